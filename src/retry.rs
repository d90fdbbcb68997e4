use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{AIError, ErrorKind};

const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;
const AUTO_RETRY_ATTEMPTS: u32 = 3;

/// Serializable retry section of the client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Turns on automatic retries (three attempts unless `max_attempts` says otherwise).
    #[serde(default)]
    pub enabled: bool,
    /// Attempts per candidate model, including the first.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

fn default_initial_delay_ms() -> u64 {
    DEFAULT_INITIAL_DELAY_MS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: None,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
        }
    }
}

/// Effective retry behaviour for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per candidate, never below one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        let max_attempts = match config.max_attempts {
            Some(attempts) => attempts.max(1),
            None if config.enabled => AUTO_RETRY_ATTEMPTS,
            None => 1,
        };
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1.
    ///
    /// A RATE_LIMIT error carrying `retry_after` overrides the exponential schedule.
    pub fn calculate_delay(&self, attempt: u32, error: &AIError) -> Duration {
        if error.kind == ErrorKind::RateLimit {
            if let Some(seconds) = error.retry_after {
                return Duration::from_secs(seconds);
            }
        }
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_delay.saturating_mul(1u32 << exponent)
    }

    /// Whether another attempt on the same candidate is allowed.
    pub fn should_retry(&self, error: &AIError, attempt: u32) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }
}

/// Runs `operation` over `[primary, ...fallbacks]` until one attempt succeeds.
///
/// Each candidate gets up to `policy.max_attempts` tries. Non-retryable failures move
/// on to the next candidate immediately. When every candidate is exhausted the last
/// observed error is returned. Cancellation stops the loop with a TIMEOUT error.
pub async fn run_with_fallback<T, F, Fut>(
    candidates: &[String],
    policy: &RetryPolicy,
    cancellation: Option<&CancellationToken>,
    mut operation: F,
) -> Result<T, AIError>
where
    F: FnMut(String, u32) -> Fut,
    Fut: Future<Output = Result<T, AIError>>,
{
    let mut last_error: Option<AIError> = None;

    for (index, model) in candidates.iter().enumerate() {
        if index > 0 {
            tracing::warn!(
                model = %model,
                previous_error = ?last_error.as_ref().map(|err| err.kind),
                "falling back to next model"
            );
        }

        let mut attempt = 1;
        loop {
            match operation(model.clone(), attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if err.kind == ErrorKind::Timeout && is_cancelled(cancellation) {
                        return Err(err);
                    }
                    if !policy.should_retry(&err, attempt) {
                        last_error = Some(err);
                        break;
                    }

                    let delay = policy.calculate_delay(attempt, &err);
                    tracing::warn!(
                        model = %model,
                        attempt,
                        kind = %err.kind,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "request failed, retrying"
                    );

                    match cancellation {
                        Some(token) => {
                            tokio::select! {
                                _ = token.cancelled() => return Err(cancelled_during_backoff(&err)),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                    attempt += 1;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| AIError::invalid_request("no candidate models to try")))
}

fn cancelled_during_backoff(failed: &AIError) -> AIError {
    match failed.provider {
        Some(provider) => AIError::cancelled().with_provider(provider),
        None => AIError::cancelled(),
    }
}

fn is_cancelled(token: Option<&CancellationToken>) -> bool {
    token.is_some_and(CancellationToken::is_cancelled)
}
