//! Exponential backoff arithmetic for the retry wrapper.

use std::time::Duration;

/// Retry bounds and delay shape.
///
/// The delay before attempt `n` (n >= 2) is `base_delay * 2^n` plus a jitter
/// drawn from `[0, max_jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl BackoffPolicy {
    /// Deterministic part of the delay before `attempt` (1-indexed).
    pub fn base_delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// Full delay given a jitter sample in `[0, 1)`.
    pub fn delay_before(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let jitter = self.max_jitter.mul_f64(jitter_sample.clamp(0.0, 1.0));
        self.base_delay_before(attempt).saturating_add(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_has_no_delay() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(1, 0.0), Duration::ZERO);
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay_before(2), Duration::from_secs(4));
        assert_eq!(policy.base_delay_before(3), Duration::from_secs(8));
        assert_eq!(policy.base_delay_before(4), Duration::from_secs(16));
    }

    #[test]
    fn jitter_stays_below_one_max_jitter() {
        let policy = BackoffPolicy::default();
        let delay = policy.delay_before(2, 0.5);
        assert_eq!(delay, Duration::from_millis(4500));
        assert!(policy.delay_before(2, 0.999) < Duration::from_secs(5));
    }

    #[test]
    fn huge_attempts_saturate() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay_before(40), Duration::MAX);
    }
}
