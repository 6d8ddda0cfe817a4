//! Bounded retry with exponential backoff for source fetches.

use std::future::Future;
use std::time::Duration;

use folio_core::{FolioError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry and backoff settings.
///
/// Only [`FolioError::is_retryable`] failures are retried. Once
/// `max_attempts` calls have failed the caller receives
/// [`FolioError::FetchFailed`] wrapping the final error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total calls made before giving up, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Fraction of each delay that may be randomly shaved off, 0.0 to 1.0.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one call.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the total number of attempts. Zero is treated as one.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the first retry delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the jitter fraction.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (1-based) after `error`.
    ///
    /// `min(base * 2^(retry-1), max)` scaled by a random factor in
    /// `[1 - jitter, 1]`, then raised to any `Retry-After` hint and capped at
    /// `max` again.
    #[must_use]
    pub fn delay_for(&self, retry: u32, error: &FolioError) -> Duration {
        let max = Duration::from_millis(self.max_delay_ms);
        let exp = Duration::from_millis(self.base_delay_ms)
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
            .min(max);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let mut delay = if jitter > 0.0 {
            exp.mul_f64(rand::thread_rng().gen_range((1.0 - jitter)..=1.0))
        } else {
            exp
        };

        if let FolioError::RateLimited {
            retry_after: Some(hint),
            ..
        } = error
        {
            delay = delay.max(*hint);
        }
        delay.min(max)
    }

    /// Runs `op` until it succeeds, fails terminally, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    ///
    /// # Errors
    /// Non-retryable errors are returned unchanged on first sight. Retryable
    /// errors on the final attempt are wrapped in [`FolioError::FetchFailed`].
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self.delay_for(attempt, &e);
                    warn!(
                        error = %e,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying fetch"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(FolioError::FetchFailed {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}
