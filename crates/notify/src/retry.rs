//! Bounded exponential backoff with a per-attempt timeout.

use std::future::Future;
use std::time::Duration;

use stockwatch_core::config::DispatchConfig;
use tracing::{debug, warn};

use crate::traits::DeliveryError;

/// Retry settings for one outbound job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

/// Final result of running a job under a [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    pub attempts: u32,
    pub result: Result<(), DeliveryError>,
}

impl RetryPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
        }
    }

    /// Delay before retrying after the `failed_attempt`-th failure (1-based):
    /// `base * 2^(n-1)`, capped at `max_delay`.
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Like [`backoff`](Self::backoff), but a rate-limit hint wins (still capped).
    pub fn delay_after(&self, failed_attempt: u32, error: &DeliveryError) -> Duration {
        match error {
            DeliveryError::RateLimited { retry_after_secs } => {
                Duration::from_secs(*retry_after_secs).min(self.max_delay)
            }
            _ => self.backoff(failed_attempt),
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt ceiling is reached. Each attempt is bounded by
    /// `attempt_timeout`; a timeout counts as a transient failure.
    pub async fn run<F, Fut>(&self, job: &str, mut op: F) -> RetryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), DeliveryError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(r) => r,
                Err(_) => Err(DeliveryError::Timeout(self.attempt_timeout.as_millis() as u64)),
            };

            let error = match result {
                Ok(()) => {
                    return RetryOutcome {
                        attempts: attempt,
                        result: Ok(()),
                    }
                }
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= self.max_attempts {
                return RetryOutcome {
                    attempts: attempt,
                    result: Err(error),
                };
            }

            let delay = self.delay_after(attempt, &error);
            warn!(job, attempt, error = %error, delay_ms = delay.as_millis() as u64, "attempt failed, will retry");
            tokio::time::sleep(delay).await;
            debug!(job, attempt = attempt + 1, "retrying");
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}
