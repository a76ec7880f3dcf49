//! Reconnect backoff.
//!
//! `delay = base_delay * 2^min(retry_count, cap_exponent)`; the retry count
//! resets to 0 on every successful open.

use std::time::Duration;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_CAP_EXPONENT: u32 = 5;
const DEFAULT_MAX_RETRIES: u32 = 10;

/// Largest exponent whose multiplier fits in `u32`. Beyond it the delay
/// saturates at `Duration::MAX`.
pub const MAX_EXACT_EXPONENT: u32 = 31;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    /// Largest exponent applied to `base_delay`
    pub cap_exponent: u32,
    /// Give up after this many consecutive failed reconnects (None = never)
    pub max_retries: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            cap_exponent: DEFAULT_CAP_EXPONENT,
            max_retries: Some(DEFAULT_MAX_RETRIES),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, cap_exponent: u32, max_retries: Option<u32>) -> Self {
        Self {
            base_delay,
            cap_exponent,
            max_retries,
        }
    }

    /// Delay before the reconnect attempt that follows `retry_count` failures.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.min(self.cap_exponent);
        match 2u32.checked_pow(exponent) {
            Some(factor) => self.base_delay.saturating_mul(factor),
            None if self.base_delay.is_zero() => Duration::ZERO,
            None => Duration::MAX,
        }
    }

    /// The longest delay this policy will ever produce.
    pub fn max_delay(&self) -> Duration {
        self.delay_for(self.cap_exponent)
    }

    pub fn exhausted(&self, retry_count: u32) -> bool {
        self.max_retries.is_some_and(|max| retry_count >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_cap() {
        let policy = BackoffPolicy::new(Duration::from_millis(500), 3, None);
        let delays: Vec<u64> = (0..6)
            .map(|n| policy.delay_for(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 4000, 4000]);
        assert_eq!(policy.max_delay(), Duration::from_secs(4));
    }

    #[test]
    fn large_cap_keeps_doubling_then_saturates() {
        let policy = BackoffPolicy::new(Duration::from_millis(1), 40, None);
        assert_eq!(policy.delay_for(31), Duration::from_millis(1 << 31));
        assert!(policy.delay_for(32) > policy.delay_for(31));
        assert_eq!(policy.delay_for(32), Duration::MAX);
        assert_eq!(policy.delay_for(u32::MAX), Duration::MAX);
        assert_eq!(policy.max_delay(), Duration::MAX);
    }

    #[test]
    fn delays_are_non_decreasing() {
        let policy = BackoffPolicy::default();
        let mut last = Duration::ZERO;
        for n in 0..50 {
            let d = policy.delay_for(n);
            assert!(d >= last);
            assert!(d <= policy.max_delay());
            last = d;
        }
    }

    #[test]
    fn huge_exponent_saturates() {
        let policy = BackoffPolicy::new(Duration::from_secs(u64::MAX / 2), 40, None);
        assert_eq!(policy.delay_for(100), Duration::MAX);
    }

    #[test]
    fn exhaustion() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), 5, Some(2));
        assert!(!policy.exhausted(0));
        assert!(!policy.exhausted(1));
        assert!(policy.exhausted(2));
        assert!(!BackoffPolicy::new(Duration::from_secs(1), 5, None).exhausted(1000));
    }
}
