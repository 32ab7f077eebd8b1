use crate::codec::{
    FragmentDecode, WireCodec, clamp_temperature, encode_with_options, ensure_unique_tool_names,
    join_url, null_as_default,
};
use crate::error::{LlmError, Result};
use crate::sse::Framing;
use crate::types::{CompletionRequest, CompletionResponse, ToolCall, ToolDefinition};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 2048;
const ANTHROPIC_MAX_TEMPERATURE: f32 = 1.0;

/// Anthropic messages wire format. Event framing is strict, and a stream
/// event without content still yields an (empty) fragment.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicCodec;

impl WireCodec for AnthropicCodec {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn default_base_url(&self) -> &'static str {
        ANTHROPIC_BASE_URL
    }

    fn framing(&self) -> Framing {
        Framing::Strict
    }

    fn endpoint(&self, base_url: &str) -> String {
        join_url(base_url, "messages")
    }

    fn headers(&self, api_key: &str, stream: bool) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("x-api-key".to_string(), api_key.to_string()),
            ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
        ];
        if stream {
            headers.push(("Accept".to_string(), "text/event-stream".to_string()));
        }
        headers
    }

    fn encode(&self, request: &CompletionRequest, stream: bool) -> Result<Bytes> {
        ensure_unique_tool_names(&request.tools)?;
        let envelope = AnthropicRequest::new(request, stream);
        encode_with_options(&envelope, &request.options)
    }

    fn decode_full(&self, body: &[u8]) -> Result<CompletionResponse> {
        let parsed: AnthropicResponse = serde_json::from_slice(body)
            .map_err(|e| LlmError::Decode(format!("failed to decode anthropic response: {e}")))?;
        parsed.try_into()
    }

    fn decode_fragment(&self, payload: &str) -> Result<FragmentDecode> {
        let event: AnthropicStreamEvent = serde_json::from_str(payload).map_err(|e| {
            LlmError::Decode(format!("anthropic event json error={e} data={payload}"))
        })?;

        if let Some(error) = event.error {
            return Err(LlmError::Api {
                provider: "anthropic",
                message: error.message,
            });
        }

        let mut fragment = CompletionResponse::default();
        match event.kind.as_deref() {
            Some("message_stop") => return Ok(FragmentDecode::Done),
            Some("message_start") => {
                if let Some(message) = event.message {
                    fragment.model = message.model;
                }
            }
            Some("content_block_start") => {
                if let Some(block) = event.content_block {
                    if block.kind == "tool_use" {
                        fragment.tool_calls.push(ToolCall {
                            index: event.index,
                            id: block.id.unwrap_or_default(),
                            name: block.name.unwrap_or_default(),
                            arguments: String::new(),
                        });
                    } else {
                        fragment.content = block.text;
                    }
                }
            }
            Some("content_block_delta") => {
                if let Some(delta) = event.delta {
                    match delta.kind.as_deref() {
                        Some("input_json_delta") => fragment.tool_calls.push(ToolCall {
                            index: event.index,
                            arguments: delta.partial_json.unwrap_or_default(),
                            ..ToolCall::default()
                        }),
                        _ => fragment.content = delta.text.unwrap_or_default(),
                    }
                }
            }
            Some("message_delta") => {
                fragment.finish_reason = event.delta.and_then(|d| d.stop_reason);
            }
            Some("ping") | Some("content_block_stop") => {}
            _ => {
                // Untyped payload in response shape: first content block only.
                fragment.content = event
                    .content
                    .into_iter()
                    .next()
                    .map(|block| block.text)
                    .unwrap_or_default();
                fragment.model = event.model;
                fragment.finish_reason = event.stop_reason;
            }
        }

        Ok(FragmentDecode::Fragment(fragment))
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: [AnthropicMessage<'a>; 1],
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<AnthropicToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

impl<'a> AnthropicRequest<'a> {
    fn new(request: &'a CompletionRequest, stream: bool) -> Self {
        let tools: Vec<AnthropicTool<'a>> =
            request.tools.iter().map(AnthropicTool::from).collect();
        let tool_choice = (!tools.is_empty()).then_some(AnthropicToolChoice { r#type: "auto" });

        Self {
            model: &request.model,
            messages: [AnthropicMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
            temperature: clamp_temperature(request.temperature, ANTHROPIC_MAX_TEMPERATURE),
            stop_sequences: request.stop.iter().map(String::as_str).collect(),
            tools,
            tool_choice,
            stream: stream.then_some(true),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

impl<'a> From<&'a ToolDefinition> for AnthropicTool<'a> {
    fn from(t: &'a ToolDefinition) -> Self {
        Self {
            name: &t.name,
            description: &t.description,
            input_schema: &t.parameters,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicToolChoice {
    r#type: &'static str,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    #[serde(default, deserialize_with = "null_as_default")]
    message: String,
}

/// Content block in either the response or an event. Untyped blocks are
/// treated as text.
#[derive(Debug, Default, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    text: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    content: Vec<AnthropicContentBlock>,
    #[serde(default, deserialize_with = "null_as_default")]
    model: String,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    error: Option<AnthropicErrorBody>,
}

impl TryFrom<AnthropicResponse> for CompletionResponse {
    type Error = LlmError;

    fn try_from(v: AnthropicResponse) -> Result<Self> {
        if let Some(error) = v.error {
            return Err(LlmError::Api {
                provider: "anthropic",
                message: error.message,
            });
        }
        if v.content.is_empty() {
            return Err(LlmError::EmptyResult("no content in response".to_string()));
        }

        let mut tool_calls = Vec::new();
        for block in v.content.iter().filter(|b| b.kind == "tool_use") {
            let input = block
                .input
                .clone()
                .unwrap_or_else(|| serde_json::json!({}));
            tool_calls.push(ToolCall {
                index: None,
                id: block.id.clone().unwrap_or_default(),
                name: block.name.clone().unwrap_or_default(),
                arguments: serde_json::to_string(&input)?,
            });
        }

        let content = v
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .unwrap_or_default();

        Ok(CompletionResponse {
            content,
            model: v.model,
            finish_reason: Some(v.stop_reason.unwrap_or_else(|| "unknown".to_string())),
            tool_calls,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamEvent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    message: Option<AnthropicStreamMessage>,
    #[serde(default)]
    content_block: Option<AnthropicContentBlock>,
    #[serde(default)]
    delta: Option<AnthropicStreamDelta>,
    #[serde(default, deserialize_with = "null_as_default")]
    content: Vec<AnthropicContentBlock>,
    #[serde(default, deserialize_with = "null_as_default")]
    model: String,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    error: Option<AnthropicErrorBody>,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    model: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamDelta {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    partial_json: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
}
