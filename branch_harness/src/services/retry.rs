//! Bounded retry with linear backoff for Neon API calls.

use std::future::Future;
use std::time::Duration;

use crate::error::NeonError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after attempt `n` is `base_delay * n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Server errors and transport failures are worth another try; 4xx are not.
pub fn is_retryable(err: &NeonError) -> bool {
    match err {
        NeonError::Status { status, .. } => *status >= 500,
        NeonError::Transport { .. } => true,
        _ => false,
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. The last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, NeonError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, NeonError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && is_retryable(&err) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    request = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Neon API call failed, retrying: {err}"
                );
                crate::metrics::api_retry(label);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
