//! Bounded retries with timeouts for durable-store calls

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::StorageConfig;
use crate::error::{Error, Result};

/// Upper bound on a single backoff sleep (in milliseconds)
const MAX_BACKOFF_MS: u64 = 5_000;

/// Retry policy for calls that may fail transiently
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards
    pub base_delay: Duration,
    /// Timeout applied to each attempt
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            timeout,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
            Duration::from_millis(config.operation_timeout_ms),
        )
    }

    /// A policy that tries once with the given timeout
    pub fn no_retry(timeout: Duration) -> Self {
        Self::new(1, Duration::ZERO, timeout)
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the
    /// attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;

        loop {
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    operation: operation.to_string(),
                    millis: self.timeout.as_millis() as u64,
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        wait_ms = delay.as_millis() as u64,
                        error = %e,
                        "Storage call failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Delay after the given failed attempt (1-based), with up to 10% jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let delay = base
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
            .min(MAX_BACKOFF_MS);
        let jitter = rand::thread_rng().gen_range(0..=delay / 10);
        Duration::from_millis(delay + jitter)
    }
}
