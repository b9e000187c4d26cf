//! Exponential backoff policy.
//!
//! One policy type serves every retry site (task re-queueing, webhook
//! delivery, target resolution), parameterized per call site instead of
//! reimplemented in each component.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff with a cap and an attempt ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Multiplier applied per subsequent attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Maximum number of attempts (including the first).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after `failed_attempts` failures, or `None` when the
    /// attempt budget is exhausted.
    ///
    /// `failed_attempts` is 1-based: after the first failure pass 1.
    pub fn delay_for(&self, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts == 0 || failed_attempts >= self.max_attempts {
            return None;
        }
        let exp = (failed_attempts - 1) as i32;
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exp);
        let capped = raw.min(self.max_delay_ms as f64);
        Some(Duration::from_millis(capped as u64))
    }

    /// Whether another attempt is allowed after `failed_attempts` failures.
    pub fn allows_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_non_decreasing() {
        let policy = BackoffPolicy {
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            max_attempts: 6,
        };

        let mut last = Duration::ZERO;
        for attempt in 1..policy.max_attempts {
            let delay = policy.delay_for(attempt).unwrap();
            assert!(delay >= last, "delay decreased at attempt {}", attempt);
            last = delay;
        }
    }

    #[test]
    fn test_delay_capped() {
        let policy = BackoffPolicy {
            base_delay_ms: 1_000,
            multiplier: 10.0,
            max_delay_ms: 5_000,
            max_attempts: 10,
        };
        assert_eq!(policy.delay_for(4).unwrap(), Duration::from_millis(5_000));
    }

    #[test]
    fn test_exhausted_returns_none() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(policy.delay_for(1).is_some());
        assert!(policy.delay_for(2).is_some());
        assert!(policy.delay_for(3).is_none());
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn test_zero_attempts_is_not_a_retry() {
        let policy = BackoffPolicy::default();
        assert!(policy.delay_for(0).is_none());
    }
}
