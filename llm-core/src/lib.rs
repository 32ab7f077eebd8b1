//! BYO-key completion client for OpenAI-compatible and Anthropic endpoints.
//!
//! One prompt in, one completion (or a stream of fragments) out. Non-streaming
//! calls retry transient HTTP failures with capped exponential backoff.

mod anthropic;
mod client;
mod codec;
mod error;
mod openai;
mod retry;
mod sse;
mod stream;
#[cfg(test)]
mod test_support;
mod transport;
mod types;

pub use anthropic::AnthropicCodec;
pub use client::{ClientConfig, LlmClient, Provider};
pub use codec::{FragmentDecode, WireCodec};
pub use error::{HttpError, LlmError, Result};
pub use openai::OpenAiCodec;
pub use retry::RetryPolicy;
pub use sse::{Framing, SseEvent, SseReader};
pub use stream::{CompletionStream, ToolCallAccumulator};
pub use transport::{
    ByteStream, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, collect_body,
};
pub use types::{CompletionRequest, CompletionResponse, ToolCall, ToolDefinition, validate_tool_name};
