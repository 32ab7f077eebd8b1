//! llmctl configuration: optional TOML file, environment credentials and
//! command-line overrides, resolved into an `llm_core::ClientConfig`.

use llm_core::{ClientConfig, Provider, RetryPolicy};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-latest";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub retry: RetrySection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSection {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub retryable_status_codes: Option<Vec<u16>>,
}

impl FileConfig {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;
        Self::parse(&contents).map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn retry_policy(&self) -> anyhow::Result<RetryPolicy> {
        let defaults = RetryPolicy::default();
        let retry = &self.retry;
        let policy = RetryPolicy {
            max_retries: retry.max_retries.unwrap_or(defaults.max_retries),
            initial_delay: retry
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_delay: retry
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            retryable_status_codes: match &retry.retryable_status_codes {
                Some(codes) => codes.iter().copied().collect::<BTreeSet<u16>>(),
                None => defaults.retryable_status_codes,
            },
        };
        if policy.initial_delay > policy.max_delay {
            anyhow::bail!(
                "retry.initial_delay_ms ({:?}) must not exceed retry.max_delay_ms ({:?})",
                policy.initial_delay,
                policy.max_delay
            );
        }
        if let Some(code) = policy
            .retryable_status_codes
            .iter()
            .find(|c| !(100..=599).contains(*c))
        {
            anyhow::bail!("retry.retryable_status_codes contains invalid HTTP status {code}");
        }
        Ok(policy)
    }
}

/// Values given on the command line (or through the environment via clap).
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub model: String,
    pub client: ClientConfig,
}

impl Settings {
    /// Flags win over the file; the file wins over library defaults. Without
    /// an explicit provider, the model name decides.
    pub fn resolve(file: &FileConfig, overrides: Overrides) -> anyhow::Result<Self> {
        let model = overrides
            .model
            .or_else(|| file.client.model.clone())
            .filter(|m| !m.trim().is_empty());
        let provider = overrides
            .provider
            .or(file.client.provider)
            .or_else(|| model.as_deref().map(Provider::from_model))
            .unwrap_or(Provider::OpenAi);
        let model = model.unwrap_or_else(|| {
            match provider {
                Provider::OpenAi => DEFAULT_OPENAI_MODEL,
                Provider::Anthropic => DEFAULT_ANTHROPIC_MODEL,
            }
            .to_string()
        });

        let (api_key, env_var) = match provider {
            Provider::OpenAi => (overrides.openai_api_key, "OPENAI_API_KEY"),
            Provider::Anthropic => (overrides.anthropic_api_key, "ANTHROPIC_API_KEY"),
        };
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("{env_var} is not set (provider {provider})"))?;

        let mut client =
            ClientConfig::new(provider, api_key).with_retry_policy(file.retry_policy()?);
        if let Some(base_url) = overrides.base_url.or_else(|| file.client.base_url.clone()) {
            client = client.with_base_url(base_url);
        }
        if let Some(secs) = file.client.timeout_secs {
            if secs == 0 {
                anyhow::bail!("client.timeout_secs must be greater than zero");
            }
            client = client.with_timeout(Duration::from_secs(secs));
        }

        Ok(Self { model, client })
    }
}
