// Retry-with-backoff driver shared by playlist and segment fetching.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::DownloadError;

/// Retry behavior for a single HTTP resource.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retry attempts after the initial one.
    pub max_retries: u32,
    /// Delay for attempt `n` (0-indexed) is `base_delay * 2^n`.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// Adds random jitter of `[0, base_delay / 2)` to each delay. Off by
    /// default so delays follow the documented formula exactly.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Checked shift so attempts >= 32 saturate instead of overflowing.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return delay;
        }
        let jitter_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        if jitter_ms == 0 {
            return delay;
        }
        let extra = rand::rng().random_range(0..jitter_ms);
        (delay + Duration::from_millis(extra)).min(self.max_delay)
    }
}

/// Outcome of a single attempt, as classified by the operation itself.
pub enum RetryAction<T> {
    Success(T),
    /// Transient failure: network error, 5xx, timeout.
    Retry(DownloadError),
    /// Permanent failure: 403/404, parse error.
    Fail(DownloadError),
}

/// Run `operation` until it succeeds, fails permanently, or exhausts
/// `policy.max_retries`. The closure receives the 0-indexed attempt number.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, DownloadError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    for attempt in 0..=policy.max_retries {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => {
                if attempt >= policy.max_retries {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient error"
                );
                tokio::select! {
                    _ = token.cancelled() => return Err(DownloadError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    // The loop always returns: the final iteration maps Retry to Err.
    Err(DownloadError::Cancelled)
}

/// Transport-level errors worth retrying.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}
