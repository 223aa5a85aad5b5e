//! Token-bucket pacing for the exchange's weight-based rate limits
//!
//! The bucket capacity is the documented weight budget per window scaled by
//! a safety margin, so steady-state usage stays well below the limit even
//! before the exchange starts returning 429s.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Weight-based token bucket. `acquire(weight)` waits until the request
/// weight fits the remaining budget.
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// `budget_per_minute` is the exchange's documented weight budget;
    /// `safety_margin` the fraction of it this process allows itself.
    pub fn new(budget_per_minute: u32, safety_margin: f64) -> Self {
        let capacity = (f64::from(budget_per_minute) * safety_margin.clamp(0.01, 1.0)).max(1.0);
        Self {
            capacity,
            refill_per_second: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Time to wait before `weight` tokens are available. Consumes the
    /// tokens immediately so concurrent callers queue up behind each other.
    fn reserve(&self, weight: u32) -> Duration {
        let weight = f64::from(weight).min(self.capacity);
        let mut state = self.state.lock();

        let elapsed = state.last_refill.elapsed();
        state.tokens =
            (state.tokens + elapsed.as_secs_f64() * self.refill_per_second).min(self.capacity);
        state.last_refill = Instant::now();

        state.tokens -= weight;
        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.refill_per_second)
        }
    }

    /// Wait until the request weight fits the budget.
    pub async fn acquire(&self, weight: u32) {
        let wait = self.reserve(weight);
        if !wait.is_zero() {
            debug!(?wait, weight, "rate limiter pacing request");
            tokio::time::sleep(wait).await;
        }
    }
}
