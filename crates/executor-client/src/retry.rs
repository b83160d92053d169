//! Retry logic for executor requests.

use std::time::Duration;
use tokio::time::sleep;

/// Backoff policy for transient executor failures.
///
/// Only errors that classify themselves as retryable (HTTP 503 at the
/// transport layer) consume retries; everything else propagates on the
/// first attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt, so `max_retries = 3` allows up to
    /// four requests on the wire.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Policy that fails on the first error.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_backoff: Duration::ZERO,
        }
    }
}

/// Classification hook consulted between attempts.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Run `operation` until it succeeds, exhausts the policy, or fails with a
/// non-retryable error. Sleeps between attempts with exponential backoff.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Debug,
{
    let mut delay = policy.initial_backoff;

    for attempt in 0..=policy.max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if attempt == policy.max_retries || !error.is_retryable() {
                    return Err(error);
                }

                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    ?error,
                    "transient executor error, backing off"
                );
                sleep(delay).await;

                delay = std::cmp::min(
                    Duration::from_secs_f64(delay.as_secs_f64() * policy.backoff_multiplier),
                    policy.max_backoff,
                );
            }
        }
    }

    unreachable!("retry loop returns from its final attempt")
}
