//! Retry backoff computation.
//!
//! The executor owns the retry loop; this module owns the arithmetic. Base
//! delay for attempt `n` is `min(max_delay, min_delay * 2^n)`; jitter is
//! applied after capping, and a server-provided `Retry-After` hint replaces
//! the computed delay (still clamped to `max_delay`, never jittered; the
//! server asked for a specific wait).

use rand::Rng;
use std::time::Duration;

/// Jitter strategy applied to computed backoff delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    None,
    /// Uniform in `[0, base]`.
    #[default]
    Full,
    /// `base/2` plus uniform in `[0, base/2]`.
    Equal,
}

/// Retry configuration for one target.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (3 = one call + two retries).
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter: Jitter::Full,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            min_delay,
            max_delay,
            jitter: Jitter::Full,
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether another attempt is allowed after `attempt` (0-based) failed.
    pub fn attempts_remain(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Deterministic base delay before jitter, bounded by `max_delay`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = (self.min_delay.as_millis() as u64)
            .saturating_mul(factor)
            .min(self.max_delay.as_millis() as u64);
        Duration::from_millis(millis)
    }

    /// The actual delay to sleep before the next attempt.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.max_delay);
        }
        let base = self.base_delay(attempt);
        let base_ms = base.as_millis() as u64;
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let millis = match self.jitter {
            Jitter::None => base_ms,
            Jitter::Full => rand::thread_rng().gen_range(0..=base_ms),
            Jitter::Equal => base_ms / 2 + rand::thread_rng().gen_range(0..=base_ms / 2),
        };
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_delays_are_non_decreasing_and_capped() {
        let policy = RetryPolicy::new(
            8,
            Duration::from_millis(100),
            Duration::from_secs(5),
        );
        let mut prev = Duration::ZERO;
        for attempt in 0..16 {
            let d = policy.base_delay(attempt);
            assert!(d >= prev, "attempt {attempt}");
            assert!(d <= Duration::from_secs(5));
            prev = d;
        }
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(10), Duration::from_secs(5));
    }

    #[test]
    fn retry_after_overrides_and_clamps() {
        let policy = RetryPolicy::new(
            3,
            Duration::from_millis(100),
            Duration::from_secs(5),
        );
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(60))),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(400), Duration::from_secs(5));
        for _ in 0..100 {
            let full = policy.delay_for(1, None);
            assert!(full <= policy.base_delay(1));

            let equal = policy.clone().with_jitter(Jitter::Equal).delay_for(1, None);
            assert!(equal >= policy.base_delay(1) / 2);
            assert!(equal <= policy.base_delay(1));
        }
    }

    #[test]
    fn attempt_budget() {
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);
        assert!(policy.attempts_remain(0));
        assert!(policy.attempts_remain(1));
        assert!(!policy.attempts_remain(2));
    }
}
