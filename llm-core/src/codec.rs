use crate::error::{LlmError, Result};
use crate::sse::Framing;
use crate::types::{CompletionRequest, CompletionResponse, ToolDefinition};
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};

/// Outcome of decoding one event-stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentDecode {
    Fragment(CompletionResponse),
    /// Nothing to yield; the stream stays open.
    Skip,
    /// The payload itself marks the end of the stream.
    Done,
}

/// Provider wire format: endpoint, headers, request envelope and the
/// response/fragment shapes.
pub trait WireCodec: Send + Sync {
    fn name(&self) -> &'static str;

    fn default_base_url(&self) -> &'static str;

    /// How strictly the event stream framing is enforced.
    fn framing(&self) -> Framing;

    fn endpoint(&self, base_url: &str) -> String;

    fn headers(&self, api_key: &str, stream: bool) -> Vec<(String, String)>;

    fn encode(&self, request: &CompletionRequest, stream: bool) -> Result<Bytes>;

    fn decode_full(&self, body: &[u8]) -> Result<CompletionResponse>;

    fn decode_fragment(&self, payload: &str) -> Result<FragmentDecode>;
}

pub(crate) fn ensure_unique_tool_names(tools: &[ToolDefinition]) -> Result<()> {
    let mut seen = HashSet::with_capacity(tools.len());
    for t in tools {
        if !seen.insert(t.name.as_str()) {
            return Err(LlmError::InvalidInput(format!(
                "duplicate tool name in request: {}",
                t.name
            )));
        }
    }
    Ok(())
}

/// Serialize `envelope`, then add provider options that do not collide with
/// fields the codec already set.
pub(crate) fn encode_with_options<T: serde::Serialize>(
    envelope: &T,
    options: &BTreeMap<String, String>,
) -> Result<Bytes> {
    let mut value = serde_json::to_value(envelope)?;
    if let Some(obj) = value.as_object_mut() {
        for (k, v) in options {
            if !obj.contains_key(k) {
                obj.insert(k.clone(), serde_json::Value::String(v.clone()));
            }
        }
    }
    Ok(Bytes::from(serde_json::to_vec(&value)?))
}

pub(crate) fn clamp_temperature(temperature: Option<f32>, max: f32) -> Option<f32> {
    temperature.map(|t| if t.is_nan() { 0.0 } else { t.clamp(0.0, max) })
}

/// Treat an explicit JSON `null` like a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + serde::Deserialize<'de>,
{
    Ok(<Option<T> as serde::Deserialize>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}
