//! Transport doubles shared by unit tests.

use crate::error::{LlmError, Result};
use crate::transport::{ByteStream, HttpRequest, HttpResponse, HttpTransport};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

pub(crate) fn sse_body(chunks: &[&str]) -> ByteStream {
    let items: Vec<Result<Bytes>> = chunks
        .iter()
        .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
        .collect();
    Box::pin(futures_util::stream::iter(items))
}

/// Body wrapper that counts how many bodies were dropped.
struct TrackedBody {
    inner: ByteStream,
    released: Arc<AtomicUsize>,
}

impl Stream for TrackedBody {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

enum Scripted {
    Response { status: u16, chunks: Vec<String> },
    /// Status arrives, body never yields.
    Stalled { status: u16 },
    /// Status arrives, body read fails.
    BrokenBody { status: u16, message: String },
    TransportError(String),
}

/// Replays queued responses in order and records every request.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<HttpRequest>>,
    released: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_response(&self, status: u16, chunks: &[&str]) {
        self.lock_script().push_back(Scripted::Response {
            status,
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
        });
    }

    pub(crate) fn push_stalled_response(&self, status: u16) {
        self.lock_script().push_back(Scripted::Stalled { status });
    }

    pub(crate) fn push_broken_body(&self, status: u16, message: &str) {
        self.lock_script().push_back(Scripted::BrokenBody {
            status,
            message: message.to_string(),
        });
    }

    pub(crate) fn push_transport_error(&self, message: &str) {
        self.lock_script()
            .push_back(Scripted::TransportError(message.to_string()));
    }

    pub(crate) fn attempts(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub(crate) fn bodies_released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Scripted>> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let next = self.lock_script().pop_front();
        let (status, inner): (u16, ByteStream) = match next {
            Some(Scripted::Response { status, chunks }) => {
                let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
                (status, sse_body(&refs))
            }
            Some(Scripted::Stalled { status }) => {
                (status, Box::pin(futures_util::stream::pending::<Result<Bytes>>()))
            }
            Some(Scripted::BrokenBody { status, message }) => {
                let items: Vec<Result<Bytes>> = vec![Err(LlmError::Transport(message))];
                (status, Box::pin(futures_util::stream::iter(items)))
            }
            Some(Scripted::TransportError(message)) => return Err(LlmError::Transport(message)),
            None => return Err(LlmError::Transport("script exhausted".to_string())),
        };
        Ok(HttpResponse {
            status,
            body: Box::pin(TrackedBody {
                inner,
                released: self.released.clone(),
            }),
        })
    }
}
