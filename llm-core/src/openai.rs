use crate::codec::{
    FragmentDecode, WireCodec, clamp_temperature, encode_with_options, ensure_unique_tool_names,
    join_url, null_as_default,
};
use crate::error::{LlmError, Result};
use crate::sse::Framing;
use crate::types::{CompletionRequest, CompletionResponse, ToolCall, ToolDefinition};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_MAX_TEMPERATURE: f32 = 2.0;

/// OpenAI chat-completions wire format. Stream events without choices are
/// skipped rather than surfaced.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiCodec;

impl WireCodec for OpenAiCodec {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn default_base_url(&self) -> &'static str {
        OPENAI_BASE_URL
    }

    fn framing(&self) -> Framing {
        Framing::Lenient
    }

    fn endpoint(&self, base_url: &str) -> String {
        join_url(base_url, "chat/completions")
    }

    fn headers(&self, api_key: &str, stream: bool) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), format!("Bearer {api_key}")),
        ];
        if stream {
            headers.push(("Accept".to_string(), "text/event-stream".to_string()));
        }
        headers
    }

    fn encode(&self, request: &CompletionRequest, stream: bool) -> Result<Bytes> {
        ensure_unique_tool_names(&request.tools)?;
        let envelope = OpenAiChatRequest::new(request, stream);
        encode_with_options(&envelope, &request.options)
    }

    fn decode_full(&self, body: &[u8]) -> Result<CompletionResponse> {
        let parsed: OpenAiChatResponse = serde_json::from_slice(body)
            .map_err(|e| LlmError::Decode(format!("failed to decode openai response: {e}")))?;
        parsed.try_into()
    }

    fn decode_fragment(&self, payload: &str) -> Result<FragmentDecode> {
        let chunk: OpenAiStreamChunk = serde_json::from_str(payload).map_err(|e| {
            LlmError::Decode(format!("openai chunk json error={e} data={payload}"))
        })?;

        if let Some(error) = chunk.error {
            return Err(LlmError::Api {
                provider: "openai",
                message: error.message,
            });
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(FragmentDecode::Skip);
        };

        let tool_calls = choice
            .delta
            .tool_calls
            .into_iter()
            .map(|tc| {
                let function = tc.function.unwrap_or_default();
                ToolCall {
                    index: tc.index,
                    id: tc.id.unwrap_or_default(),
                    name: function.name.unwrap_or_default(),
                    arguments: function.arguments.unwrap_or_default(),
                }
            })
            .collect();

        Ok(FragmentDecode::Fragment(CompletionResponse {
            content: choice.delta.content.unwrap_or_default(),
            model: chunk.model,
            finish_reason: choice.finish_reason,
            tool_calls,
        }))
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: [OpenAiMessage<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

impl<'a> OpenAiChatRequest<'a> {
    fn new(request: &'a CompletionRequest, stream: bool) -> Self {
        let tools: Vec<OpenAiTool<'a>> = request.tools.iter().map(OpenAiTool::from).collect();
        let tool_choice = if tools.is_empty() { None } else { Some("auto") };

        Self {
            model: &request.model,
            messages: [OpenAiMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: clamp_temperature(request.temperature, OPENAI_MAX_TEMPERATURE),
            stop: request.stop.iter().map(String::as_str).collect(),
            tools,
            tool_choice,
            stream: stream.then_some(true),
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct OpenAiTool<'a> {
    r#type: &'static str,
    /// `ToolDefinition` already serializes as `{name, description, parameters}`.
    function: &'a ToolDefinition,
}

impl<'a> From<&'a ToolDefinition> for OpenAiTool<'a> {
    fn from(t: &'a ToolDefinition) -> Self {
        Self {
            r#type: "function",
            function: t,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    #[serde(default, deserialize_with = "null_as_default")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    choices: Vec<OpenAiChoice>,
    #[serde(default, deserialize_with = "null_as_default")]
    model: String,
    #[serde(default)]
    error: Option<OpenAiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    #[serde(default, deserialize_with = "null_as_default")]
    message: OpenAiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    tool_calls: Vec<OpenAiChoiceToolCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceToolCall {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    function: OpenAiChoiceToolCallFunction,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiChoiceToolCallFunction {
    #[serde(default, deserialize_with = "null_as_default")]
    name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    arguments: String,
}

impl TryFrom<OpenAiChatResponse> for CompletionResponse {
    type Error = LlmError;

    fn try_from(v: OpenAiChatResponse) -> Result<Self> {
        if let Some(error) = v.error {
            return Err(LlmError::Api {
                provider: "openai",
                message: error.message,
            });
        }

        let choice = v.choices.into_iter().next().ok_or_else(|| {
            LlmError::EmptyResult("no completion choices returned".to_string())
        })?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCall {
                index: tc.index,
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            model: v.model,
            finish_reason: Some(
                choice
                    .finish_reason
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
            tool_calls,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default, deserialize_with = "null_as_default")]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default, deserialize_with = "null_as_default")]
    model: String,
    #[serde(default)]
    error: Option<OpenAiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default, deserialize_with = "null_as_default")]
    delta: OpenAiStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiStreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    tool_calls: Vec<OpenAiStreamDeltaToolCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamDeltaToolCall {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiStreamDeltaToolFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiStreamDeltaToolFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
