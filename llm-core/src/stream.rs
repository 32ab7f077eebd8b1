use crate::codec::{FragmentDecode, WireCodec};
use crate::error::{HttpError, LlmError, Result};
use crate::sse::{SseEvent, SseReader};
use crate::transport::{ByteStream, HttpRequest, HttpTransport, until_cancelled};
use crate::types::{CompletionResponse, ToolCall};
use futures_util::Stream;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Streaming,
    Exhausted,
    Closed,
}

/// Pull-based sequence of completion fragments for one streaming exchange.
///
/// `recv` yields `Ok(Some(fragment))` until the stream ends, then `Ok(None)`
/// on every later call. After `close`, `recv` fails with `StreamClosed`.
/// Owned by a single caller; not meant for shared concurrent use.
pub struct CompletionStream {
    codec: Arc<dyn WireCodec>,
    reader: Option<SseReader>,
    state: StreamState,
    cancel: CancellationToken,
    tool_calls: ToolCallAccumulator,
    model: String,
}

impl CompletionStream {
    /// Issue the streaming request. A non-2xx status fails here, after the
    /// error body has been drained and released.
    pub(crate) async fn open(
        codec: Arc<dyn WireCodec>,
        transport: &dyn HttpTransport,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let response = until_cancelled(&cancel, transport.post(request)).await?;
        if !response.is_success() {
            let status = response.status;
            let body = match until_cancelled(&cancel, response.text()).await {
                Ok(body) => body,
                Err(LlmError::Cancelled) => return Err(LlmError::Cancelled),
                Err(error) => {
                    tracing::debug!(status, %error, "failed to read error response body");
                    String::new()
                }
            };
            return Err(LlmError::Http(HttpError { status, body }));
        }
        Ok(Self::from_body(codec, response.body, cancel))
    }

    /// Wrap an already-validated event-stream body.
    pub fn from_body(
        codec: Arc<dyn WireCodec>,
        body: ByteStream,
        cancel: CancellationToken,
    ) -> Self {
        let framing = codec.framing();
        Self {
            codec,
            reader: Some(SseReader::new(body, framing)),
            state: StreamState::Streaming,
            cancel,
            tool_calls: ToolCallAccumulator::default(),
            model: String::new(),
        }
    }

    pub async fn recv(&mut self) -> Result<Option<CompletionResponse>> {
        loop {
            match self.state {
                StreamState::Exhausted => return Ok(None),
                StreamState::Closed => return Err(LlmError::StreamClosed),
                StreamState::Streaming => {}
            }
            let Some(reader) = self.reader.as_mut() else {
                return Err(LlmError::StreamClosed);
            };

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                event = reader.next_event() => Some(event),
            };
            let Some(event) = next else {
                self.close();
                return Err(LlmError::Cancelled);
            };

            let payload = match event? {
                SseEvent::Data(payload) => payload,
                SseEvent::Done | SseEvent::Eof => {
                    self.state = StreamState::Exhausted;
                    return Ok(None);
                }
            };

            match self.codec.decode_fragment(&payload)? {
                FragmentDecode::Skip => {
                    tracing::debug!(provider = self.codec.name(), "skipping event without choices");
                }
                FragmentDecode::Done => {
                    self.state = StreamState::Exhausted;
                    return Ok(None);
                }
                FragmentDecode::Fragment(mut fragment) => {
                    if fragment.model.is_empty() {
                        fragment.model.clone_from(&self.model);
                    } else {
                        self.model.clone_from(&fragment.model);
                    }
                    for call in &fragment.tool_calls {
                        self.tool_calls.push(call);
                    }
                    return Ok(Some(fragment));
                }
            }
        }
    }

    /// Release the underlying body. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            tracing::debug!(provider = self.codec.name(), "completion stream closed");
        }
        self.state = StreamState::Closed;
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == StreamState::Exhausted
    }

    /// Tool calls reconstructed from the fragments seen so far, by index.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.tool_calls.calls()
    }

    /// Adapt into a `Stream` that ends at end-of-stream or after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<CompletionResponse>> + Send {
        futures_util::stream::unfold(Some(self), |state| async move {
            let mut stream = state?;
            match stream.recv().await {
                Ok(Some(fragment)) => Some((Ok(fragment), Some(stream))),
                Ok(None) => None,
                Err(e) => {
                    stream.close();
                    Some((Err(e), None))
                }
            }
        })
    }
}

/// Concatenates streamed tool-call fragments, keyed by call index (or by id
/// when the provider omits the index), in arrival order.
#[derive(Debug, Default, Clone)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, ToolCall>,
    index_by_id: HashMap<String, u32>,
}

impl ToolCallAccumulator {
    pub fn push(&mut self, fragment: &ToolCall) {
        let key = match fragment.index {
            Some(index) => index,
            None if fragment.id.is_empty() => 0,
            None => match self.index_by_id.get(&fragment.id) {
                Some(index) => *index,
                None => self.calls.keys().next_back().map_or(0, |k| k + 1),
            },
        };

        let entry = self.calls.entry(key).or_insert_with(|| ToolCall {
            index: Some(key),
            ..ToolCall::default()
        });
        if entry.id.is_empty() && !fragment.id.is_empty() {
            entry.id.clone_from(&fragment.id);
            self.index_by_id.insert(fragment.id.clone(), key);
        }
        if entry.name.is_empty() && !fragment.name.is_empty() {
            entry.name.clone_from(&fragment.name);
        }
        entry.arguments.push_str(&fragment.arguments);
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
