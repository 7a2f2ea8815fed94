//! Exponential backoff between attempts on one candidate

use crate::config::RetrySettings;
use crate::providers::ProviderError;
use rand::Rng;
use std::time::Duration;

/// Attempt limit and backoff schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per candidate, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub base_delay: Duration,

    /// Ceiling applied before jitter
    pub max_delay: Duration,

    /// Base for exponential backoff (e.g., 2.0 for doubling)
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0) to randomize delays
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
            jitter: settings.jitter,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Un-jittered delay after the zero-based `attempt` failed
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay after the zero-based `attempt` failed, with jitter applied
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt).as_millis() as f64;
        let delay = if self.jitter > 0.0 {
            let range = nominal * self.jitter;
            let jitter = rand::thread_rng().gen_range(-range..=range);
            (nominal + jitter).max(0.0)
        } else {
            nominal
        };
        Duration::from_millis(delay.round() as u64)
    }

    /// Delay to wait before retrying after `error`
    ///
    /// A backend retry hint longer than the schedule wins, bounded by the
    /// maximum delay.
    pub fn delay_after(&self, attempt: u32, error: &ProviderError) -> Duration {
        let scheduled = self.delay_for(attempt);
        match error.retry_delay() {
            Some(hint) if hint > scheduled => hint.min(self.max_delay),
            _ => scheduled,
        }
    }

    /// Whether another attempt on the same candidate is allowed
    pub fn should_retry(&self, error: &ProviderError, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts && error.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(1000));
        assert_eq!(policy.multiplier, 2.0);
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..Default::default()
        };

        assert_eq!(policy.delay_for(0).as_millis(), 1000);
        assert_eq!(policy.delay_for(1).as_millis(), 2000);
        assert_eq!(policy.delay_for(2).as_millis(), 4000);
        assert_eq!(policy.delay_for(3).as_millis(), 8000);
        // Would be 16000ms but capped
        assert_eq!(policy.delay_for(4).as_millis(), 10_000);
        assert_eq!(policy.delay_for(40).as_millis(), 10_000);
    }

    #[test]
    fn test_retry_hint_is_bounded() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        let short = ProviderError::RateLimit {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(policy.delay_after(0, &short), Duration::from_secs(5));

        let long = ProviderError::RateLimit {
            retry_after: Some(Duration::from_secs(600)),
        };
        assert_eq!(policy.delay_after(0, &long), Duration::from_secs(10));
    }

    #[test]
    fn test_should_retry_logic() {
        let policy = RetryPolicy::default();
        let timeout = ProviderError::Timeout(Duration::from_secs(30));
        assert!(policy.should_retry(&timeout, 1));
        assert!(policy.should_retry(&timeout, 2));
        assert!(!policy.should_retry(&timeout, 3));

        let auth_error = ProviderError::Authentication("bad key".into());
        assert!(!policy.should_retry(&auth_error, 1));
    }

    proptest! {
        #[test]
        fn prop_delay_within_jitter_band(attempt in 0u32..32) {
            let policy = RetryPolicy::default();
            let nominal = (1000.0 * 2f64.powi(attempt as i32)).min(10_000.0);
            let delay = policy.delay_for(attempt).as_millis() as f64;
            prop_assert!(delay >= (nominal * 0.9).floor());
            prop_assert!(delay <= (nominal * 1.1).ceil());
        }
    }
}
