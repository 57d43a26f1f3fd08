//! Circuit breaker for chronically failing websites.
//!
//! Pure functions over `(consecutive_failures, now)`. Each failure pushes
//! the next retry out exponentially (1h, 2h, 4h ... capped at 24h); the
//! tenth consecutive failure disables the site until someone re-enables it.

use chrono::{DateTime, Duration, Utc};

/// Consecutive failures after which a site stops being scheduled.
pub const DISABLE_AFTER_FAILURES: u32 = 10;

/// A state change to apply to a website's scheduling columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerUpdate {
    /// Reset failures, clear the retry time, stamp `last_crawled_at`
    Success { crawled_at: DateTime<Utc> },
    /// Back off until `next_retry_at`
    Retry {
        consecutive_failures: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// Permanently excluded from scheduling
    Disable {
        consecutive_failures: u32,
        disabled_at: DateTime<Utc>,
    },
    /// Manual re-enable of a disabled site
    Reenable,
}

impl BreakerUpdate {
    pub fn consecutive_failures(&self) -> u32 {
        match *self {
            BreakerUpdate::Success { .. } | BreakerUpdate::Reenable => 0,
            BreakerUpdate::Retry {
                consecutive_failures,
                ..
            }
            | BreakerUpdate::Disable {
                consecutive_failures,
                ..
            } => consecutive_failures,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub disable_after: u32,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::hours(1),
            max_delay: Duration::hours(24),
            disable_after: DISABLE_AFTER_FAILURES,
        }
    }
}

impl CircuitBreakerPolicy {
    /// `min(base * 2^(n-1), max)` for the n-th consecutive failure (n >= 1).
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let factor = 1i32.checked_shl(exponent).filter(|f| *f > 0).unwrap_or(i32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    pub fn on_failure(&self, consecutive_failures: u32, now: DateTime<Utc>) -> BreakerUpdate {
        let failures = consecutive_failures.saturating_add(1);
        if failures >= self.disable_after {
            BreakerUpdate::Disable {
                consecutive_failures: failures,
                disabled_at: now,
            }
        } else {
            BreakerUpdate::Retry {
                consecutive_failures: failures,
                next_retry_at: now + self.backoff(failures),
            }
        }
    }

    pub fn on_success(&self, now: DateTime<Utc>) -> BreakerUpdate {
        BreakerUpdate::Success { crawled_at: now }
    }

    pub fn reenable(&self) -> BreakerUpdate {
        BreakerUpdate::Reenable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn backoff_sequence_doubles_then_caps() {
        let policy = CircuitBreakerPolicy::default();
        let hours: Vec<i64> = (1..=8).map(|n| policy.backoff(n).num_hours()).collect();
        assert_eq!(hours, vec![1, 2, 4, 8, 16, 24, 24, 24]);
    }

    #[test]
    fn first_failure_retries_in_an_hour() {
        let now = Utc::now();
        let update = CircuitBreakerPolicy::default().on_failure(0, now);
        assert_eq!(
            update,
            BreakerUpdate::Retry {
                consecutive_failures: 1,
                next_retry_at: now + Duration::hours(1),
            }
        );
    }

    #[test]
    fn tenth_failure_disables() {
        let now = Utc::now();
        let policy = CircuitBreakerPolicy::default();

        assert!(matches!(policy.on_failure(8, now), BreakerUpdate::Retry { consecutive_failures: 9, .. }));
        assert_eq!(
            policy.on_failure(9, now),
            BreakerUpdate::Disable {
                consecutive_failures: 10,
                disabled_at: now,
            }
        );
    }

    #[test]
    fn success_resets_counter() {
        let now = Utc::now();
        let update = CircuitBreakerPolicy::default().on_success(now);
        assert_eq!(update.consecutive_failures(), 0);
        assert_eq!(update, BreakerUpdate::Success { crawled_at: now });
    }

    proptest! {
        #[test]
        fn backoff_matches_closed_form(n in 1u32..200) {
            let policy = CircuitBreakerPolicy::default();
            let expected = if n >= 6 { 24 } else { 1i64 << (n - 1) };
            prop_assert_eq!(policy.backoff(n).num_hours(), expected);
        }

        #[test]
        fn backoff_is_non_decreasing(n in 1u32..10_000) {
            let policy = CircuitBreakerPolicy::default();
            prop_assert!(policy.backoff(n) <= policy.backoff(n + 1));
        }

        #[test]
        fn failures_always_increment(n in 0u32..DISABLE_AFTER_FAILURES) {
            let update = CircuitBreakerPolicy::default().on_failure(n, Utc::now());
            prop_assert_eq!(update.consecutive_failures(), n + 1);
        }
    }
}
