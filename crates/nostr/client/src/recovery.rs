//! Bounded retry with capped exponential backoff.

use crate::config::RetryConfig;
use crate::error::{ClientError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff calculator.
///
/// The attempt count is explicit state: each `next_delay` call consumes one
/// retry, and `None` means the sequence is exhausted.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff sequence.
    ///
    /// `max_attempts` of 0 means unlimited attempts.
    pub fn new(initial_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts: (max_attempts > 0).then_some(max_attempts),
            attempt: 0,
        }
    }

    /// Get the next delay in the sequence, `None` once exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        // min(initial * 2^attempt, max)
        let initial_ms = self.initial_delay.as_millis();
        let max_ms = self.max_delay.as_millis();
        let multiplier = 1u128.checked_shl(self.attempt.min(63)).unwrap_or(u128::MAX);
        let capped_ms = initial_ms.saturating_mul(multiplier).min(max_ms);

        self.attempt = self.attempt.saturating_add(1);
        Some(Duration::from_millis(
            capped_ms.min(u64::MAX as u128) as u64
        ))
    }

    /// Reset the attempt counter.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_attempts.is_some_and(|max| self.attempt >= max)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for ExponentialBackoff {
    /// `max_attempts` counts the first try, so the backoff hands out one
    /// fewer delay.
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.initial_delay(),
            config.max_delay(),
            config.max_attempts.saturating_sub(1).max(1),
        )
    }
}

/// Retries retryable failures of an async operation.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Policy that tries once and never waits.
    pub fn none() -> Self {
        Self::new(RetryConfig {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned on exhaustion.
    pub async fn retry<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut backoff = ExponentialBackoff::from(&self.config);
        let mut attempt = 1;

        loop {
            let err: ClientError = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= max_attempts {
                return Err(err);
            }

            let Some(delay) = backoff.next_delay() else {
                return Err(err);
            };
            warn!(
                operation = label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after failure"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
