//! Per-provider token-bucket rate limiting.
//!
//! Buckets refill lazily on acquire and serve waiters in arrival order:
//! an acquirer holds the bucket lock while it sleeps for its refill, so
//! later arrivals queue behind it on the lock and a latecomer asking for
//! fewer tokens can never starve an earlier waiter. Sleeps are sliced so
//! cancellation and timeouts are observed within 100 ms.

use crate::provider::RateLimitSpec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Longest uninterrupted sleep inside an acquire.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Why an acquire did not return a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquireError {
    #[error("rate limiter wait cancelled")]
    Cancelled,
    #[error("rate limiter wait timed out")]
    TimedOut,
    #[error("requested more tokens than the bucket capacity")]
    ExceedsCapacity,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket with continuous (lazily computed) refill.
pub struct TokenBucket {
    spec: RateLimitSpec,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(spec: RateLimitSpec) -> Self {
        Self {
            spec,
            state: Mutex::new(BucketState {
                tokens: spec.capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn spec(&self) -> RateLimitSpec {
        self.spec
    }

    /// Acquires `n` tokens, waiting for refill if necessary.
    ///
    /// Waiters are served FIFO. The wait is bounded by `timeout` and
    /// aborts promptly when `cancel` fires.
    pub async fn acquire(
        &self,
        n: f64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), AcquireError> {
        if n > self.spec.capacity {
            return Err(AcquireError::ExceedsCapacity);
        }

        let deadline = Instant::now() + timeout;
        // Holding the state lock across the refill wait is what gives
        // arrival-order fairness; tokio's Mutex queues waiters FIFO.
        let mut state = self.state.lock().await;

        loop {
            refill(&mut state, &self.spec);
            if state.tokens >= n {
                state.tokens -= n;
                trace!(remaining = state.tokens, "token acquired");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(AcquireError::TimedOut);
            }

            let deficit = n - state.tokens;
            let needed = Duration::from_secs_f64(deficit / self.spec.tokens_per_second);
            let sleep = needed.min(MAX_SLEEP_SLICE).min(deadline - now);

            tokio::select! {
                _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    }
}

fn refill(state: &mut BucketState, spec: &RateLimitSpec) {
    let now = Instant::now();
    let elapsed = now.duration_since(state.last_refill).as_secs_f64();
    state.tokens = (state.tokens + elapsed * spec.tokens_per_second).min(spec.capacity);
    state.last_refill = now;
}

/// One bucket per provider, built at engine startup and read-only after.
#[derive(Default)]
pub struct RateLimiterTable {
    buckets: HashMap<String, Arc<TokenBucket>>,
}

impl RateLimiterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: impl Into<String>, spec: RateLimitSpec) {
        self.buckets
            .insert(provider.into(), Arc::new(TokenBucket::new(spec)));
    }

    pub fn bucket(&self, provider: &str) -> Option<Arc<TokenBucket>> {
        self.buckets.get(provider).cloned()
    }
}
