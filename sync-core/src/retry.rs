//! Retry policies.
//!
//! Two policies are in use: the single-change partner path retries on a
//! fixed delay, the bulk path backs off exponentially. Both are expressed
//! as a [`RetryPolicy`] so the state machines stay agnostic of the path.

use std::time::Duration;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The receiver answered with a 2xx status.
    Delivered,
    /// Non-2xx status or transport error, with a human readable detail.
    Failed(String),
}

impl DeliveryOutcome {
    /// Whether the attempt succeeded.
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed(Duration),
    /// `base * 2^(n-1)` after the n-th failure.
    Exponential {
        /// Delay after the first failure.
        base: Duration,
    },
}

/// Bounded retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of failed attempts before giving up (at least 1).
    pub max_attempts: u32,
    /// Delay schedule.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Partner default: 3 attempts, 5 seconds apart.
    pub fn partner_default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Fixed(Duration::from_secs(5)),
        }
    }

    /// Bulk default: 3 retries, exponential from 60 seconds.
    pub fn bulk_default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(60),
            },
        }
    }

    /// Delay to wait after the `failures`-th consecutive failure.
    ///
    /// `failures` is 1-based; 0 is treated as 1.
    pub fn delay_for(&self, failures: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base } => {
                let exponent = failures.max(1) - 1;
                let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
        }
    }

    /// Whether `failures` failed attempts exhaust the policy.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_is_constant() {
        let policy = RetryPolicy::partner_default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(5));
    }

    #[test]
    fn exponential_delay_doubles() {
        let policy = RetryPolicy::bulk_default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(2), Duration::from_secs(120));
        assert_eq!(policy.delay_for(3), Duration::from_secs(240));
    }

    #[test]
    fn exponential_zero_treated_as_first_failure() {
        let policy = RetryPolicy::bulk_default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(60));
    }

    #[test]
    fn exponential_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::bulk_default();
        assert_eq!(policy.delay_for(200), Duration::from_secs(60).saturating_mul(u32::MAX));
    }

    #[test]
    fn exhaustion_threshold() {
        let policy = RetryPolicy::partner_default();
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }

    #[test]
    fn zero_max_attempts_still_allows_one() {
        let policy = RetryPolicy {
            max_attempts: 0,
            backoff: Backoff::Fixed(Duration::ZERO),
        };
        assert!(!policy.is_exhausted(0));
        assert!(policy.is_exhausted(1));
    }
}
