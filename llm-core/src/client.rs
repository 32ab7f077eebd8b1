use crate::anthropic::AnthropicCodec;
use crate::codec::WireCodec;
use crate::error::{HttpError, LlmError, Result};
use crate::openai::OpenAiCodec;
use crate::retry::RetryPolicy;
use crate::stream::CompletionStream;
use crate::transport::{HttpRequest, HttpTransport, ReqwestTransport, collect_body, until_cancelled};
use crate::types::{CompletionRequest, CompletionResponse};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

impl Provider {
    /// `claude-*` models go to Anthropic, everything else to OpenAI.
    pub fn from_model(model: &str) -> Self {
        let m = model.to_ascii_lowercase();
        if m.starts_with("claude-") {
            return Self::Anthropic;
        }
        Self::OpenAi
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    fn codec(self) -> Arc<dyn WireCodec> {
        match self {
            Self::OpenAi => Arc::new(OpenAiCodec),
            Self::Anthropic => Arc::new(AnthropicCodec),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(LlmError::InvalidInput(format!(
                "unknown provider {other:?}; expected openai or anthropic"
            ))),
        }
    }
}

#[derive(Clone)]
pub struct ClientConfig {
    pub provider: Provider,
    pub api_key: String,
    /// Defaults to the provider's public endpoint.
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl ClientConfig {
    pub fn new(provider: Provider, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

/// One client per provider. Configuration is read-only after construction,
/// so a client can be cloned and shared across concurrent calls.
#[derive(Clone)]
pub struct LlmClient {
    provider: Provider,
    codec: Arc<dyn WireCodec>,
    transport: Arc<dyn HttpTransport>,
    api_key: Arc<str>,
    base_url: String,
    retry_policy: RetryPolicy,
}

impl LlmClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.timeout));
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::InvalidInput("api_key is required".to_string()));
        }
        let codec = config.provider.codec();
        let base_url = config
            .base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| codec.default_base_url().to_string());

        Ok(Self {
            provider: config.provider,
            codec,
            transport,
            api_key: Arc::from(config.api_key),
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_policy: config.retry_policy,
        })
    }

    pub fn openai(api_key: &str) -> Result<Self> {
        Self::new(ClientConfig::new(Provider::OpenAi, api_key))
    }

    pub fn anthropic(api_key: &str) -> Result<Self> {
        Self::new(ClientConfig::new(Provider::Anthropic, api_key))
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Non-streaming completion, retried per the client's policy.
    #[tracing::instrument(level = "info", skip_all, fields(provider = %self.provider, model = %request.model))]
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse> {
        let http_request = self.http_request(self.codec.encode(request, false)?, false);

        self.retry_policy
            .run(cancel, |attempt| {
                let http_request = http_request.clone();
                async move {
                    tracing::debug!(attempt, url = %http_request.url, "sending completion request");
                    self.complete_once(http_request, cancel).await
                }
            })
            .await
    }

    /// Streaming completion. Fails immediately on a non-2xx status; streaming
    /// requests are never retried.
    #[tracing::instrument(level = "info", skip_all, fields(provider = %self.provider, model = %request.model))]
    pub async fn complete_stream(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionStream> {
        let http_request = self.http_request(self.codec.encode(request, true)?, true);
        CompletionStream::open(
            self.codec.clone(),
            self.transport.as_ref(),
            http_request,
            cancel.clone(),
        )
        .await
    }

    async fn complete_once(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse> {
        let response = until_cancelled(cancel, self.transport.post(request)).await?;
        let status = response.status;
        let success = response.is_success();
        let body = until_cancelled(cancel, collect_body(response.body)).await?;

        if !success {
            return Err(LlmError::Http(HttpError {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            }));
        }
        self.codec.decode_full(&body)
    }

    fn http_request(&self, body: Bytes, stream: bool) -> HttpRequest {
        HttpRequest {
            url: self.codec.endpoint(&self.base_url),
            headers: self.codec.headers(&self.api_key, stream),
            body,
        }
    }
}

impl fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}
