//! Retry with exponential backoff for store and index round-trips

use std::fmt::Display;
use std::time::Duration;

use crate::error::{CorpusError, IndexError, StoreError};

/// Errors that can tell whether repeating the failed call may succeed.
pub(crate) trait Retryable: Display {
    fn is_retryable(&self) -> bool;
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        StoreError::is_retryable(self)
    }
}

impl Retryable for IndexError {
    fn is_retryable(&self) -> bool {
        IndexError::is_retryable(self)
    }
}

impl Retryable for CorpusError {
    fn is_retryable(&self) -> bool {
        matches!(self, CorpusError::Unavailable(_))
    }
}

/// How many times to retry, and how long to wait before the first retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Exponential backoff: base × 2^(attempt - 1) (base, 2×base, 4×base, ...)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Retry a fallible operation with exponential backoff.
///
/// Retryable errors are logged and retried up to `policy.max_retries` times.
/// Returns `Ok(T)` on first success, or the final `Err` on exhaustion or a
/// non-retryable error.
pub(crate) fn retry_with_backoff<T, E: Retryable>(
    label: &str,
    policy: &RetryPolicy,
    mut attempt_fn: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let max_retries = policy.max_retries;
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                attempt += 1;
                log::debug!("{label}: attempt {attempt}/{max_retries} failed: {e}, retrying...");
                std::thread::sleep(policy.backoff_duration(attempt));
            }
            Err(e) => {
                log::error!("{label}: failed permanently: {e}");
                return Err(e);
            }
        }
    }
}
