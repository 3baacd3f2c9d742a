//! Retry helper for store operations.
//!
//! A single [`RetryPolicy`] is applied uniformly to every store call instead
//! of per-method decoration. The policy names how many attempts to make and
//! which [`ErrorCode`]s are worth another attempt; everything else is returned
//! immediately.

use crate::error::{Error, ErrorCode, Result};
use std::time::Duration;
use tracing::warn;

/// Attempts and retryable error kinds for a store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Linear backoff step: attempt `n` waits `n * base_delay`.
    pub base_delay: Duration,
    pub retry_on: Vec<ErrorCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            retry_on: vec![ErrorCode::TransientBusy],
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn should_retry(&self, err: &Error) -> bool {
        self.retry_on.contains(&err.error_code())
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out.
    ///
    /// A retryable error that outlives every attempt is escalated as
    /// [`Error::TransientBusy`] carrying the attempt count.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or `TransientBusy` after the
    /// final attempt.
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(&err) && attempt < attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Store busy, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) if self.should_retry(&err) => {
                    return Err(Error::TransientBusy {
                        operation: operation.to_string(),
                        attempts,
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}
