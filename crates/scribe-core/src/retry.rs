use crate::error::{Result, ScribeError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff schedule for one retried stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Ceiling for any single delay, jitter included.
    pub max_delay_ms: u64,
    /// Total calls allowed, the first one included.
    pub max_attempts: u32,
    /// Randomise each delay within the upper half of its exponential step.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 20_000,
            max_attempts: 5,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            max_attempts,
            jitter: true,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Upper bound of the delay before retry number `retry` (0-based):
    /// `base * 2^retry`, capped at `max_delay`.
    pub fn ceiling_for(&self, retry: u32) -> Duration {
        let exponent = retry.min(20);
        let delay = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(exponent));
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Delay to sleep before retry number `retry` (0-based).
    ///
    /// Without jitter the schedule is non-decreasing and strictly increasing
    /// until it reaches `max_delay`. With jitter each delay lies in
    /// `[ceiling / 2, ceiling]`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let ceiling = self.ceiling_for(retry).as_millis() as u64;
        if !self.jitter || ceiling < 2 {
            return Duration::from_millis(ceiling);
        }
        let floor = ceiling / 2;
        let jittered = rand::thread_rng().gen_range(floor..=ceiling);
        Duration::from_millis(jittered)
    }

    /// Whether another call is allowed after `attempts_made` calls.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ScribeError::Config(format!(
                "{}.max_attempts must be > 0",
                name
            )));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ScribeError::Config(format!(
                "{}.base_delay_ms ({}) must be <= max_delay_ms ({})",
                name, self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_unjittered_schedule_doubles_until_cap() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(1_000), 6)
            .with_jitter(false);

        let delays: Vec<u128> = (0..6).map(|r| policy.delay_for(r).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn test_allows_another_counts_first_call() {
        let policy = BackoffPolicy::default().with_max_attempts(3);
        assert!(policy.allows_another(1));
        assert!(policy.allows_another(2));
        assert!(!policy.allows_another(3));
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let policy = BackoffPolicy {
            base_delay_ms: 5_000,
            max_delay_ms: 1_000,
            ..Default::default()
        };
        assert!(policy.validate("fetch_backoff").is_err());
        assert!(BackoffPolicy::default()
            .with_max_attempts(0)
            .validate("x")
            .is_err());
    }

    proptest! {
        #[test]
        fn prop_jittered_delay_within_half_ceiling(
            base in 1u64..5_000,
            extra in 0u64..60_000,
            retry in 0u32..40,
        ) {
            let policy = BackoffPolicy {
                base_delay_ms: base,
                max_delay_ms: base + extra,
                max_attempts: 10,
                jitter: true,
            };
            let ceiling = policy.ceiling_for(retry);
            let delay = policy.delay_for(retry);
            prop_assert!(delay <= ceiling);
            prop_assert!(delay >= ceiling / 2);
            prop_assert!(delay <= Duration::from_millis(policy.max_delay_ms));
        }

        #[test]
        fn prop_ceiling_is_monotonic(base in 1u64..5_000, retry in 0u32..30) {
            let policy = BackoffPolicy {
                base_delay_ms: base,
                max_delay_ms: 120_000,
                max_attempts: 10,
                jitter: false,
            };
            prop_assert!(policy.ceiling_for(retry) <= policy.ceiling_for(retry + 1));
        }
    }
}
