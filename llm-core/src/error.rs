use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("{provider} API error: {message}")]
    Api {
        provider: &'static str,
        message: String,
    },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("event stream protocol error: {0}")]
    Protocol(String),

    #[error("empty result: {0}")]
    EmptyResult(String),

    #[error("max retries exceeded after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<LlmError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("stream already closed")]
    StreamClosed,
}

impl LlmError {
    /// Status code of the underlying HTTP failure, looking through a
    /// retries-exhausted wrapper.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(e) => Some(e.status),
            Self::RetriesExhausted { source, .. } => source.status(),
            _ => None,
        }
    }
}

/// Non-2xx response: status code plus the raw body text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct HttpError {
    pub status: u16,
    pub body: String,
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}: {}", self.status, self.body)
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
