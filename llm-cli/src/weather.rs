//! Tool-calling round-trip: offer `get_weather`, run it locally when the
//! model asks for it, then feed the result back for a natural-language answer.

use crate::commands::print_stream;
use anyhow::Context;
use clap::ValueEnum;
use llm_core::{CompletionRequest, LlmClient, ToolCall, ToolDefinition};
use serde::Deserialize;
use serde_json::json;
use std::io::Write;
use tokio_util::sync::CancellationToken;

pub const TOOL_NAME: &str = "get_weather";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Unit {
    #[value(name = "C")]
    Celsius,
    #[value(name = "F")]
    Fahrenheit,
}

impl Unit {
    fn word(self) -> &'static str {
        match self {
            Self::Celsius => "Celsius",
            Self::Fahrenheit => "Fahrenheit",
        }
    }
}

#[derive(Debug, Deserialize)]
struct WeatherParams {
    location: String,
    #[serde(default)]
    unit: String,
}

pub fn weather_tool() -> anyhow::Result<ToolDefinition> {
    Ok(ToolDefinition::validated(
        TOOL_NAME,
        "Get the current weather in a given location",
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The city and state, e.g., San Francisco, CA"
                },
                "unit": {"type": "string", "enum": ["C", "F"]}
            },
            "required": ["location", "unit"]
        }),
    )?)
}

/// Mock lookup; always 22 degrees.
pub fn get_weather(location: &str, unit: &str) -> String {
    format!("The weather in {location} is 22°{unit}")
}

pub fn follow_up_prompt(result: &str) -> String {
    format!(
        "The weather function returned: {result}. Please provide a natural response to the user's question."
    )
}

pub fn question(location: &str, unit: Unit) -> String {
    format!("What's the weather like in {location}? Please use {}.", unit.word())
}

/// Results for every `get_weather` call; other tool names are ignored.
fn run_tool_calls(calls: &[ToolCall]) -> anyhow::Result<Vec<String>> {
    let mut results = Vec::new();
    for call in calls {
        if call.name != TOOL_NAME {
            tracing::warn!(tool = %call.name, "model requested an unknown tool; ignoring");
            continue;
        }
        let params: WeatherParams = serde_json::from_str(&call.arguments)
            .with_context(|| format!("failed to parse weather parameters: {}", call.arguments))?;
        tracing::info!(location = %params.location, unit = %params.unit, "running get_weather");
        results.push(get_weather(&params.location, &params.unit));
    }
    Ok(results)
}

#[tracing::instrument(level = "info", skip_all, fields(model = %model, location = %location, stream = stream))]
pub async fn run<W: Write>(
    client: &LlmClient,
    model: &str,
    location: &str,
    unit: Unit,
    stream: bool,
    cancel: &CancellationToken,
    out: &mut W,
) -> anyhow::Result<()> {
    let request = CompletionRequest::new(model, question(location, unit)).with_tool(weather_tool()?);
    if stream {
        run_streaming(client, model, &request, cancel, out).await
    } else {
        run_non_streaming(client, model, &request, cancel, out).await
    }
}

async fn run_non_streaming<W: Write>(
    client: &LlmClient,
    model: &str,
    request: &CompletionRequest,
    cancel: &CancellationToken,
    out: &mut W,
) -> anyhow::Result<()> {
    let resp = client
        .complete(request, cancel)
        .await
        .context("completion request failed")?;

    let results = run_tool_calls(&resp.tool_calls)?;
    if results.is_empty() {
        writeln!(out, "Response: {}", resp.content)?;
        return Ok(());
    }
    for result in results {
        let follow_up = CompletionRequest::new(model, follow_up_prompt(&result));
        let resp = client
            .complete(&follow_up, cancel)
            .await
            .context("follow-up completion request failed")?;
        writeln!(out, "Response: {}", resp.content)?;
    }
    Ok(())
}

async fn run_streaming<W: Write>(
    client: &LlmClient,
    model: &str,
    request: &CompletionRequest,
    cancel: &CancellationToken,
    out: &mut W,
) -> anyhow::Result<()> {
    let mut stream = client
        .complete_stream(request, cancel)
        .await
        .context("streaming request failed")?;
    let printed = print_stream(&mut stream, out).await;
    let calls = stream.tool_calls();
    stream.close();
    printed?;

    for result in run_tool_calls(&calls)? {
        let follow_up = CompletionRequest::new(model, follow_up_prompt(&result));
        let mut stream = client
            .complete_stream(&follow_up, cancel)
            .await
            .context("follow-up streaming request failed")?;
        let printed = print_stream(&mut stream, out).await;
        stream.close();
        printed?;
    }
    writeln!(out)?;
    Ok(())
}
