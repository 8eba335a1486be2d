//! Retry decisions for failed probes.
//!
//! The policy is stateless: it looks only at how many times a task has been
//! dispatched. The queue owns the actual state transition.

use std::time::Duration;

use sitescan_core::{RetryBackoff, SchedulerConfig};

/// Outcome of consulting the [`RetryPolicy`] after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue once `delay` has elapsed.
    Retry { delay: Duration },
    /// Retries exhausted; archive the task as Failed.
    GiveUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff: RetryBackoff,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A constant-delay policy.
    pub fn fixed(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            backoff: RetryBackoff::Fixed,
            max_delay: retry_delay,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            backoff: config.retry_backoff,
            max_delay: config.max_retry_delay(),
        }
    }

    /// `attempts` is the number of dispatches so far, including the one that just failed.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts <= self.max_retries
    }

    /// Delay before the retry that follows attempt number `attempts`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        match self.backoff {
            RetryBackoff::Fixed => self.retry_delay,
            RetryBackoff::Exponential => {
                let exponent = attempts.saturating_sub(1).min(31);
                self.retry_delay
                    .saturating_mul(1u32 << exponent)
                    .min(self.max_delay.max(self.retry_delay))
            }
        }
    }

    pub fn decide(&self, attempts: u32) -> RetryDecision {
        if self.should_retry(attempts) {
            RetryDecision::Retry {
                delay: self.delay_for(attempts),
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_until_attempts_exceed_max() {
        let policy = RetryPolicy::fixed(2, Duration::from_millis(50));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn zero_retries_gives_up_immediately() {
        let policy = RetryPolicy::fixed(0, Duration::from_millis(50));
        assert_eq!(policy.decide(1), RetryDecision::GiveUp);
    }

    #[test]
    fn fixed_delay_is_constant() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(200));
        for attempt in 1..=5 {
            assert_eq!(
                policy.decide(attempt),
                RetryDecision::Retry {
                    delay: Duration::from_millis(200)
                }
            );
        }
    }

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            retry_delay: Duration::from_millis(100),
            backoff: RetryBackoff::Exponential,
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn from_config_copies_settings() {
        let config = SchedulerConfig::default()
            .with_max_retries(1)
            .with_retry_delay(Duration::from_millis(75));
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.retry_delay, Duration::from_millis(75));
        assert_eq!(policy.backoff, RetryBackoff::Fixed);
    }
}
