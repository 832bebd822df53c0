//! One retry policy shared by every provider adapter.
//!
//! Overload/5xx responses are retried with exponential delay before the
//! error surfaces; the orchestrator then walks the model fallback set. The
//! policy is a value object so call sites never sprinkle ad-hoc backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::errors::ProviderError;

/// Retry configuration: attempt ceiling, base delay, and the predicate that
/// decides which errors are worth retrying.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub retryable: fn(&ProviderError) -> bool,
}

impl Default for RetryPolicy {
    /// Provider default: 3 attempts with 2s/4s delays between them.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            retryable: ProviderError::is_retryable,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base × 2^(attempt-1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Run `op` until it succeeds, a non-retryable error occurs, the
    /// attempt ceiling is hit, or the caller cancels mid-backoff.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if (self.retryable)(&err) && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "provider call failed, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
