//! Exponential backoff for transient exchange failures
//!
//! Used by the gateway when the exchange is unavailable or rate limiting.
//! Jitter prevents synchronized retries across workers.

use rand::Rng;
use std::time::Duration;

/// Configuration for exponential backoff
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each retry
    pub multiplier: f64,
    /// Maximum number of retry attempts (None = unlimited)
    pub max_retries: Option<usize>,
    /// Randomization applied to each delay (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_retries: Some(5),
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Short fuse for calls whose failure is handled by the next poll tick
    pub fn bounded(max_retries: usize) -> Self {
        Self {
            max_retries: Some(max_retries),
            ..Default::default()
        }
    }
}

/// Exponential backoff state machine
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_attempt: usize,
    current_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            current_attempt: 0,
            config,
        }
    }

    /// Get the next delay duration and advance the backoff state.
    ///
    /// Returns None once max retries are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max_retries) = self.config.max_retries {
            if self.current_attempt >= max_retries {
                return None;
            }
        }

        let base = self.current_delay;
        let jittered = self.apply_jitter(base);

        self.current_attempt += 1;
        let next = base.mul_f64(self.config.multiplier);
        self.current_delay = next.min(self.config.max_delay);

        Some(jittered)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }
        let spread = self.config.jitter_factor.min(1.0);
        let factor = 1.0 + rand::thread_rng().gen_range(-spread..=spread);
        delay.mul_f64(factor.max(0.0))
    }

    /// Number of attempts consumed so far
    pub fn attempts(&self) -> usize {
        self.current_attempt
    }

    /// Reset to the initial state after a success
    pub fn reset(&mut self) {
        self.current_attempt = 0;
        self.current_delay = self.config.initial_delay;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_retries: Option<usize>) -> ExponentialBackoff {
        ExponentialBackoff::with_config(BackoffConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_retries,
            jitter_factor: 0.0,
        })
    }

    #[test]
    fn delays_double_up_to_cap() {
        let mut backoff = no_jitter(None);
        let delays: Vec<u64> = (0..8)
            .map(|_| backoff.next_delay().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn exhausts_after_max_retries() {
        let mut backoff = no_jitter(Some(3));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn reset_restores_initial_delay() {
        let mut backoff = no_jitter(Some(10));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut backoff = ExponentialBackoff::with_config(BackoffConfig {
            initial_delay: Duration::from_secs(10),
            jitter_factor: 0.2,
            ..Default::default()
        });
        for _ in 0..50 {
            backoff.reset();
            let delay = backoff.next_delay().unwrap();
            assert!(delay >= Duration::from_secs(8) && delay <= Duration::from_secs(12));
        }
    }
}
