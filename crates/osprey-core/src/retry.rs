//! Retry with exponential backoff.
//!
//! A policy object wrapped around provider fetches by the engine. Permanent
//! failures return after a single attempt; transient failures are retried
//! up to the attempt budget with capped exponential backoff, honoring a
//! server-provided `Retry-After` when it is longer than the computed wait.

use crate::error::FetchError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Backoff and attempt budget for provider calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_factor: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(4),
        }
    }
}

/// Terminal result of a retried call that never succeeded.
#[derive(Debug)]
pub enum RetryError {
    /// A permanent-class failure; exactly one attempt was made since the
    /// last success.
    Permanent { error: FetchError },
    /// The attempt budget ran out on transient failures.
    Exhausted { error: FetchError, attempts: u32 },
    /// Cancellation fired during a backoff wait.
    Cancelled,
}

impl RetryPolicy {
    /// Wait before attempt `attempt` (1-indexed). Zero for the first.
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = self.backoff_factor.powi(attempt as i32 - 2);
        self.initial_backoff.mul_f64(exp).min(self.max_backoff)
    }

    /// Runs `call` under this policy. All attempts share the given
    /// `(provider, target)` context for logging.
    pub async fn run<T, F, Fut>(
        &self,
        provider: &str,
        target: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut last_error: Option<FetchError> = None;

        for attempt in 1..=self.max_attempts.max(1) {
            if attempt > 1 {
                let mut wait = self.backoff_before(attempt);
                if let Some(retry_after) = last_error.as_ref().and_then(|e| e.retry_after) {
                    wait = wait.max(retry_after);
                }
                debug!(provider, target, attempt, ?wait, "backing off before retry");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            match call(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(provider, target, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_transient() => {
                    warn!(
                        provider,
                        target,
                        attempt,
                        status = error.status,
                        "transient failure: {}",
                        error
                    );
                    last_error = Some(error);
                }
                Err(error) => {
                    warn!(provider, target, attempt, "permanent failure: {}", error);
                    return Err(RetryError::Permanent { error });
                }
            }
        }

        Err(RetryError::Exhausted {
            error: last_error
                .unwrap_or_else(|| FetchError::transient("retry budget exhausted")),
            attempts: self.max_attempts.max(1),
        })
    }
}
