//! Line-oriented server-sent-events reader.
//!
//! Only `data:` lines carry payloads. A payload of `[DONE]` is the terminal
//! sentinel. Blank lines separate events and are otherwise ignored.

use crate::error::{LlmError, Result};
use crate::transport::ByteStream;
use futures_util::StreamExt;

const DONE_SENTINEL: &str = "[DONE]";

/// How to treat non-blank lines that carry no `data:` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Skip anything that is not a `data:` line.
    Lenient,
    /// Skip standard SSE fields (`event:`, `id:`, `retry:`) and `:` comments,
    /// reject everything else as a protocol error.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Raw payload, ready for the codec.
    Data(String),
    /// `data: [DONE]`.
    Done,
    /// The body ended cleanly without a sentinel.
    Eof,
}

pub struct SseReader {
    body: ByteStream,
    buffer: Vec<u8>,
    framing: Framing,
    body_finished: bool,
}

impl SseReader {
    pub fn new(body: ByteStream, framing: Framing) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            framing,
            body_finished: false,
        }
    }

    pub async fn next_event(&mut self) -> Result<SseEvent> {
        loop {
            let Some(raw) = self.next_line().await? else {
                return Ok(SseEvent::Eof);
            };
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(payload) = strip_data_prefix(line) {
                if payload.trim() == DONE_SENTINEL {
                    return Ok(SseEvent::Done);
                }
                return Ok(SseEvent::Data(payload.to_string()));
            }

            match self.framing {
                Framing::Lenient => {
                    tracing::trace!(line, "skipping non-data event stream line");
                }
                Framing::Strict if is_sse_field(line) => {}
                Framing::Strict => {
                    return Err(LlmError::Protocol(format!(
                        "invalid SSE format: expected `data: ` line, got {line:?}"
                    )));
                }
            }
        }
    }

    /// Next `\n`-terminated line, or the unterminated tail once the body ends.
    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(idx) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=idx).collect();
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            if self.body_finished {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let tail = std::mem::take(&mut self.buffer);
                return Ok(Some(String::from_utf8_lossy(&tail).into_owned()));
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    return Err(match e {
                        LlmError::Transport(msg) => {
                            LlmError::Transport(format!("failed to read stream: {msg}"))
                        }
                        other => other,
                    });
                }
                None => self.body_finished = true,
            }
        }
    }
}

fn strip_data_prefix(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

fn is_sse_field(line: &str) -> bool {
    line.starts_with(':')
        || line.starts_with("event:")
        || line.starts_with("id:")
        || line.starts_with("retry:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn body(chunks: &[&str]) -> ByteStream {
        let items: Vec<Result<Bytes>> = chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
            .collect();
        Box::pin(futures_util::stream::iter(items))
    }

    async fn drain(reader: &mut SseReader) -> Vec<SseEvent> {
        let mut out = Vec::new();
        loop {
            let ev = reader.next_event().await.expect("event");
            let terminal = !matches!(ev, SseEvent::Data(_));
            out.push(ev);
            if terminal {
                return out;
            }
        }
    }

    #[tokio::test]
    async fn reassembles_lines_split_across_reads() {
        let mut reader = SseReader::new(
            body(&["da", "ta: {\"a\":", "1}\n", "\n\n", "data: [DO", "NE]\n\n"]),
            Framing::Lenient,
        );
        assert_eq!(
            drain(&mut reader).await,
            vec![SseEvent::Data("{\"a\":1}".to_string()), SseEvent::Done]
        );
    }

    #[tokio::test]
    async fn lenient_framing_skips_unknown_lines() {
        let mut reader = SseReader::new(
            body(&[": keep-alive\n", "garbage\n", "event: x\n", "data: one\r\n\r\n"]),
            Framing::Lenient,
        );
        assert_eq!(
            drain(&mut reader).await,
            vec![SseEvent::Data("one".to_string()), SseEvent::Eof]
        );
    }

    #[tokio::test]
    async fn strict_framing_rejects_malformed_lines() {
        let mut reader = SseReader::new(body(&["garbage\n", "data: one\n"]), Framing::Strict);
        let err = reader.next_event().await.expect_err("protocol error");
        assert!(matches!(err, LlmError::Protocol(_)));
    }

    #[tokio::test]
    async fn strict_framing_accepts_standard_fields() {
        let mut reader = SseReader::new(
            body(&["event: ping\n", "id: 7\n", ": comment\n", "data: {}\n\n"]),
            Framing::Strict,
        );
        assert_eq!(
            reader.next_event().await.expect("event"),
            SseEvent::Data("{}".to_string())
        );
    }

    #[tokio::test]
    async fn unterminated_last_line_is_still_read() {
        let mut reader = SseReader::new(body(&["data: tail"]), Framing::Strict);
        assert_eq!(
            drain(&mut reader).await,
            vec![SseEvent::Data("tail".to_string()), SseEvent::Eof]
        );
        assert_eq!(reader.next_event().await.expect("eof"), SseEvent::Eof);
    }

    #[tokio::test]
    async fn read_errors_propagate() {
        let items: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: partial")),
            Err(LlmError::Transport("connection reset".to_string())),
        ];
        let mut reader = SseReader::new(Box::pin(futures_util::stream::iter(items)), Framing::Lenient);
        let err = reader.next_event().await.expect_err("read failure");
        assert!(err.to_string().contains("connection reset"));
    }
}
