use crate::error::{LlmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Single-turn completion request. The prompt always becomes exactly one
/// user message on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    /// Provider-specific top-level body fields. Never override codec fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_stop(mut self, stop: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stop = stop.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema, passed through verbatim.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a `ToolDefinition` after validating the name against all provider constraints.
    pub fn validated(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Result<Self> {
        let name = name.into();
        validate_tool_name(&name)?;
        Ok(Self {
            name,
            description: description.into(),
            parameters,
        })
    }
}

/// Both providers accept `^[A-Za-z0-9_-]{1,64}$`.
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        return Err(LlmError::InvalidInput(format!(
            "tool name must be 1..=64 characters: {name:?}"
        )));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(LlmError::InvalidInput(format!(
            "tool name {name:?} contains invalid character {ch:?}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Position of the call within the response; set on streamed fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// JSON string, never parsed here.
    #[serde(default)]
    pub arguments: String,
}

/// A full non-streaming response, or one streamed fragment (delta text).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl CompletionResponse {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.finish_reason.is_none() && self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_names_are_validated() {
        assert!(ToolDefinition::validated("get_weather", "weather", json!({})).is_ok());
        assert!(ToolDefinition::validated("shell-exec_2", "x", json!({})).is_ok());

        let err = ToolDefinition::validated("shell.execute", "x", json!({}))
            .expect_err("dot is rejected");
        assert!(matches!(err, LlmError::InvalidInput(_)));
        assert!(ToolDefinition::validated("", "x", json!({})).is_err());
        assert!(ToolDefinition::validated("a".repeat(65), "x", json!({})).is_err());
    }

    #[test]
    fn request_builder_collects_fields() {
        let req = CompletionRequest::new("gpt-4", "hi")
            .with_max_tokens(20)
            .with_temperature(0.8)
            .with_stop(["."])
            .with_option("user", "u-1");
        assert_eq!(req.model, "gpt-4");
        assert_eq!(req.prompt, "hi");
        assert_eq!(req.max_tokens, Some(20));
        assert_eq!(req.stop, vec![".".to_string()]);
        assert_eq!(req.options.get("user").map(String::as_str), Some("u-1"));
    }

    #[test]
    fn neutral_fragment_is_empty() {
        let mut fragment = CompletionResponse {
            model: "claude-3".to_string(),
            ..CompletionResponse::default()
        };
        assert!(fragment.is_empty());
        fragment.finish_reason = Some("end_turn".to_string());
        assert!(!fragment.is_empty());
    }
}
