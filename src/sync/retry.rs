//! Retry policy for engine pushes
//!
//! Exponential backoff with a capped number of attempts.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Backoff schedule for failed pushes
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total push attempts before an apply is dead-lettered
    pub max_attempts: u32,

    pub initial_backoff: Duration,

    pub max_backoff: Duration,

    pub multiplier: f64,

    /// Draw each delay uniformly from `[0, backoff]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether another attempt is allowed after `attempts_made`
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Upper bound of the delay after the given failed attempt (1-based)
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delay before retrying after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let millis = rand::rng().random_range(0..=ceiling.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_ceiling() {
        let policy = RetryPolicy::new()
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_millis(1000))
            .jitter(false);

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(5), Duration::from_millis(1000));
        assert_eq!(policy.backoff(60), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_under_ceiling() {
        let policy = RetryPolicy::new().initial_backoff(Duration::from_millis(100));
        for attempt in 1..6 {
            assert!(policy.backoff(attempt) <= policy.ceiling(attempt));
        }
    }

    #[test]
    fn test_attempt_cap() {
        let policy = RetryPolicy::new().max_attempts(3);
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert_eq!(RetryPolicy::new().max_attempts(0).max_attempts, 1);
    }
}
