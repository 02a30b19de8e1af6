//! Retry-with-backoff for blocking operations.
//!
//! Delays double on every attempt, starting at `base_delay` and capped at
//! `max_delay`. Waiting between attempts observes the cancellation token so an
//! interrupt aborts a retry loop without sitting out the remaining backoff.

use super::HttpError;
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Granularity at which a backoff sleep or pending request checks for cancellation
pub(super) const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt).
    pub max_retries: u32,
    /// Delay before the first retry. Every following retry waits twice as long.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // attempts >= 32 saturate instead of overflowing the shift
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Result of a single attempt, used by the caller to signal retryability.
pub(crate) enum RetryAction<T> {
    /// Operation succeeded.
    Success(T),
    /// Operation failed with a retryable error (connection, timeout, 5xx).
    Retry(HttpError),
    /// Operation failed with a non-retryable error (4xx, decode error).
    Fail(HttpError),
}

/// Execute a blocking operation with retry-and-backoff.
///
/// The `operation` closure receives the current attempt number (0-indexed).
/// Once `max_retries` retries have failed, the last error is wrapped in
/// [`HttpError::Exhausted`].
pub(crate) fn retry_with_backoff<F, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T, HttpError>
where
    F: FnMut(u32) -> RetryAction<T>,
{
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(HttpError::Cancelled);
        }

        match operation(attempt) {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => {
                if attempt >= policy.max_retries {
                    return Err(HttpError::Exhausted {
                        attempts: attempt + 1,
                        last: Box::new(err),
                    });
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transient error"
                );
                if !sleep_unless_cancelled(delay, token) {
                    return Err(HttpError::Cancelled);
                }
                attempt += 1;
            }
        }
    }
}

/// Sleeps for `duration`, waking early when the token is cancelled.
///
/// Returns `false` if the sleep was cut short by cancellation.
pub(crate) fn sleep_unless_cancelled(duration: Duration, token: &CancellationToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(CANCEL_POLL_INTERVAL));
    }
}
