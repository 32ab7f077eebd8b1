use crate::error::{LlmError, Result};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 4] = [429, 500, 502, 503];

/// Bounded exponential backoff for the non-streaming call path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub retryable_status_codes: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// `min(initial_delay * 2^(attempt-1), max_delay)`; zero for the first attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 1_u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Only HTTP failures whose status is in the retryable set qualify.
    pub fn is_retryable(&self, err: &LlmError) -> bool {
        match err {
            LlmError::Http(e) => self.retryable_status_codes.contains(&e.status),
            _ => false,
        }
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget (`max_retries + 1`) is spent. `call` receives the
    /// zero-based attempt number.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut call: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.delay_for_attempt(attempt);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match call(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if self.is_retryable(&error) => {
                    tracing::warn!(
                        %error,
                        attempt = attempt.saturating_add(1),
                        max_attempts = self.max_attempts(),
                        next_delay = ?self.delay_for_attempt(attempt.saturating_add(1)),
                        "retryable completion failure"
                    );
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        let source = last_error.unwrap_or(LlmError::Cancelled);
        Err(LlmError::RetriesExhausted {
            attempts: self.max_attempts(),
            source: Box::new(source),
        })
    }
}
