//! Retry logic with exponential backoff for transient provider errors.
//!
//! Waits are cooperative: every sleep and every in-flight provider call is
//! raced against the cancellation token, so a cancelled apply stops at the
//! next suspension point instead of finishing its backoff.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::provider::ProviderError;

/// Bounded exponential backoff policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied per retry
    pub backoff_factor: f64,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given (0-indexed) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run a future unless the token fires first.
pub async fn cancellable<T, Fut>(cancel: &CancellationToken, future: Fut) -> Result<T, ProviderError>
where
    Fut: Future<Output = Result<T, ProviderError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ProviderError::cancelled()),
        result = future => result,
    }
}

/// Sleep for `delay` unless the token fires first.
pub async fn pause(cancel: &CancellationToken, delay: Duration) -> Result<(), ProviderError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ProviderError::cancelled()),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Execute an operation with retry logic.
///
/// Retries the operation while it returns a transient error, using
/// exponential backoff between attempts. Permanent and cancellation errors
/// are returned immediately.
///
/// # Returns
/// The result of the operation, or the last error if all attempts failed.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match cancellable(cancel, operation()).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() || attempt + 1 >= max_attempts {
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                log::warn!(
                    "{}: attempt {}/{} failed: {}. Retrying in {:?}",
                    label,
                    attempt + 1,
                    max_attempts,
                    e,
                    delay
                );

                pause(cancel, delay).await?;
                attempt += 1;
            }
        }
    }
}
