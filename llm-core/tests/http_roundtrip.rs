//! End-to-end exchanges over real HTTP against a local mock server.

use llm_core::{
    ClientConfig, CompletionRequest, LlmClient, LlmError, Provider, RetryPolicy, ToolDefinition,
};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(provider: Provider, server: &MockServer) -> LlmClient {
    let config = ClientConfig::new(provider, "test-api-key")
        .with_base_url(server.uri())
        .with_timeout(Duration::from_secs(5))
        .with_retry_policy(RetryPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            ..RetryPolicy::default()
        });
    LlmClient::new(config).expect("client")
}

fn sse(events: &[&str]) -> ResponseTemplate {
    let body: String = events.iter().map(|e| format!("{e}\n\n")).collect();
    ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/event-stream")
}

#[tokio::test]
async fn openai_completion_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-api-key"))
        .and(header("Content-Type", "application/json"))
        .and(body_partial_json(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hello"}],
            "max_tokens": 64
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "model": "gpt-4",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello! How can I help you today?"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 12, "total_tokens": 21}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = CompletionRequest::new("gpt-4", "Hello").with_max_tokens(64);
    let resp = client(Provider::OpenAi, &server)
        .complete(&request, &CancellationToken::new())
        .await
        .expect("completion");

    assert_eq!(resp.content, "Hello! How can I help you today?");
    assert_eq!(resp.model, "gpt-4");
    assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
}

#[tokio::test]
async fn rate_limited_requests_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4",
            "choices": [{"message": {"content": "Success after retry"}, "finish_reason": "stop"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resp = client(Provider::OpenAi, &server)
        .complete(&CompletionRequest::new("gpt-4", "hi"), &CancellationToken::new())
        .await
        .expect("completion after retries");
    assert_eq!(resp.content, "Success after retry");
}

#[tokio::test]
async fn unauthorized_is_reported_with_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(Provider::OpenAi, &server)
        .complete(&CompletionRequest::new("gpt-4", "hi"), &CancellationToken::new())
        .await
        .expect_err("unauthorized");
    match err {
        LlmError::Http(e) => {
            assert_eq!(e.status, 401);
            assert!(e.body.contains("Incorrect API key"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn openai_stream_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Accept", "text/event-stream"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(sse(&[
            r#"data: {"model":"gpt-4","choices":[{"delta":{"content":"Hello"}}]}"#,
            r#"data: {"choices":[]}"#,
            r#"data: {"choices":[{"delta":{"content":" World"},"finish_reason":"stop"}]}"#,
            "data: [DONE]",
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let mut stream = client(Provider::OpenAi, &server)
        .complete_stream(&CompletionRequest::new("gpt-4", "hi"), &CancellationToken::new())
        .await
        .expect("stream");

    let first = stream.recv().await.expect("first").expect("fragment");
    assert_eq!(first.content, "Hello");
    let second = stream.recv().await.expect("second").expect("fragment");
    assert_eq!(second.content, " World");
    assert_eq!(second.model, "gpt-4");
    assert_eq!(second.finish_reason.as_deref(), Some("stop"));
    assert!(stream.recv().await.expect("end").is_none());
    assert!(stream.is_exhausted());
    stream.close();
}

#[tokio::test]
async fn stream_error_status_fails_before_any_fragment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(Provider::OpenAi, &server)
        .complete_stream(&CompletionRequest::new("gpt-4", "hi"), &CancellationToken::new())
        .await;
    let err = result.err().expect("stream construction fails");
    assert_eq!(err.status(), Some(503));
    assert!(err.to_string().contains("overloaded"));
}

#[tokio::test]
async fn anthropic_completion_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "test-api-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-3-opus-20240229",
            "max_tokens": 2048,
            "messages": [{"role": "user", "content": "Test prompt"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "Test response"}],
            "model": "claude-3-opus-20240229",
            "stop_reason": "end_turn"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resp = client(Provider::Anthropic, &server)
        .complete(
            &CompletionRequest::new("claude-3-opus-20240229", "Test prompt"),
            &CancellationToken::new(),
        )
        .await
        .expect("completion");
    assert_eq!(resp.content, "Test response");
    assert_eq!(resp.finish_reason.as_deref(), Some("end_turn"));
}

#[tokio::test]
async fn anthropic_typed_stream_with_tool_use() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_partial_json(json!({
            "stream": true,
            "tool_choice": {"type": "auto"}
        })))
        .respond_with(sse(&[
            "event: message_start\n\
             data: {\"type\":\"message_start\",\"message\":{\"model\":\"claude-3-5-sonnet\"}}",
            "event: content_block_start\n\
             data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"get_weather\",\"input\":{}}}",
            "event: content_block_delta\n\
             data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"location\\\":\"}}",
            "event: content_block_delta\n\
             data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"Tokyo\\\"}\"}}",
            "event: message_delta\n\
             data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"}}",
            "event: message_stop\n\
             data: {\"type\":\"message_stop\"}",
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let tool = ToolDefinition::validated(
        "get_weather",
        "Get the current weather in a location",
        json!({"type": "object", "properties": {"location": {"type": "string"}}}),
    )
    .expect("tool");
    let request = CompletionRequest::new("claude-3-5-sonnet", "Weather in Tokyo?").with_tool(tool);

    let mut stream = client(Provider::Anthropic, &server)
        .complete_stream(&request, &CancellationToken::new())
        .await
        .expect("stream");

    let mut finish_reason = None;
    while let Some(fragment) = stream.recv().await.expect("fragment") {
        if fragment.finish_reason.is_some() {
            finish_reason = fragment.finish_reason;
        }
    }
    assert_eq!(finish_reason.as_deref(), Some("tool_use"));

    let calls = stream.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "toolu_1");
    assert_eq!(calls[0].name, "get_weather");
    assert_eq!(calls[0].arguments, r#"{"location":"Tokyo"}"#);
}
