//! Retry policy and per-request timeout for collaborator calls.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{sleep, timeout};

use crate::config::RetryConfig;
use crate::error::{Result, SimError};

/// Configurable retry policy
pub trait RetryPolicy: Send + Sync {
    /// Maximum number of attempts (including the first)
    fn max_attempts(&self) -> u32;
    /// Whether to retry after `attempt` (0-based) failed with `error`
    fn should_retry(&self, attempt: u32, error: &SimError) -> bool;
    /// Backoff duration after the given attempt
    fn backoff(&self, attempt: u32) -> Duration;
}

/// Default exponential backoff retry policy
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Base backoff duration in milliseconds
    pub base_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 8000,
        }
    }
}

impl From<&RetryConfig> for ExponentialBackoff {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_backoff_ms: config.base_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    fn should_retry(&self, attempt: u32, error: &SimError) -> bool {
        !error.is_fatal() && attempt + 1 < self.max_attempts()
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let backoff = self.base_backoff_ms.saturating_mul(1 << attempt.min(10));
        Duration::from_millis(backoff.min(self.max_backoff_ms))
    }
}

/// Run `call` until it succeeds, a fatal error occurs, or the policy gives up.
///
/// Each attempt is bounded by `request_timeout`. Exhaustion surfaces as
/// [`SimError::Conversation`].
pub async fn call_with_retry<'a, T, P, F>(
    policy: &P,
    request_timeout: Duration,
    what: &str,
    mut call: F,
) -> Result<T>
where
    P: RetryPolicy + ?Sized,
    F: FnMut() -> BoxFuture<'a, Result<T>>,
{
    let mut attempts = 0;
    let mut last_error = String::new();

    loop {
        let attempt = attempts;
        attempts += 1;

        let outcome = match timeout(request_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(SimError::Timeout(request_timeout.as_millis() as u64)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!("{} attempt {} failed: {}", what, attempts, e);
                let retry = policy.should_retry(attempt, &e);
                last_error = e.to_string();
                if !retry {
                    break;
                }
                sleep(policy.backoff(attempt)).await;
            },
        }
    }

    Err(SimError::Conversation {
        attempts,
        last_error,
    })
}
