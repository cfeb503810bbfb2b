//! Retry policy for failed batches
//!
//! Exponential backoff: the delay before retry `n` (1-based) is
//! `initial_delay * multiplier^(n-1)`, capped at `max_delay`. Without jitter the
//! policy is a pure function of the attempt number.
//!
//! Jitter adds a uniform extra delay in `[0, delay * jitter]` (then capped again).
//! With `jitter_seed` set the sequence is reproducible.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::errors::{SinkError, SinkResult};

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Jitter ratio in `[0, 1]`, 0 disables jitter
    pub jitter: f64,
    /// Seed for reproducible jitter
    pub jitter_seed: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
            jitter_seed: None,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> SinkResult<()> {
        if self.initial_delay.is_zero() {
            return Err(SinkError::config("retry initial delay must be greater than zero"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(SinkError::config("retry multiplier must be at least 1.0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(SinkError::config(
                "retry max delay must not be smaller than the initial delay",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(SinkError::config("retry jitter must be between 0.0 and 1.0"));
        }
        Ok(())
    }
}

/// What went wrong with an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The endpoint answered with a non-success status
    Status {
        code: u16,
        retry_after: Option<Duration>,
    },
    /// The request did not complete in time
    Timeout,
    /// Connection or transfer failure
    Network,
    /// Failure that repeating the request cannot fix
    Permanent,
}

impl FailureKind {
    pub fn status(code: u16) -> Self {
        Self::Status {
            code,
            retry_after: None,
        }
    }
}

/// Decides whether and when a failed batch is retried
#[derive(Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
    rng: Option<Mutex<StdRng>>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        let rng = (config.jitter > 0.0).then(|| {
            let rng = match config.jitter_seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            Mutex::new(rng)
        });
        Self { config, rng }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before the next attempt, or `None` when the batch must fail permanently
    ///
    /// `attempt` is the number of attempts already made (the first dispatch is 1).
    pub fn should_retry(&self, attempt: u32, failure: &FailureKind) -> Option<Duration> {
        if *failure == FailureKind::Permanent || attempt > self.config.max_retries {
            return None;
        }

        let mut delay = self.backoff(attempt);
        if let FailureKind::Status {
            retry_after: Some(retry_after),
            ..
        } = failure
        {
            delay = delay.max(*retry_after).min(self.config.max_delay);
        }
        Some(delay)
    }

    /// Backoff delay before retry number `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let base_ms =
            self.config.initial_delay.as_millis() as f64 * self.config.multiplier.powi(exponent as i32);
        let max_ms = self.config.max_delay.as_millis() as f64;
        let mut delay_ms = base_ms.min(max_ms);

        if let Some(rng) = &self.rng {
            let extra = match rng.lock() {
                Ok(mut rng) => rng.random_range(0.0..=delay_ms * self.config.jitter),
                Err(poisoned) => poisoned
                    .into_inner()
                    .random_range(0.0..=delay_ms * self.config.jitter),
            };
            delay_ms = (delay_ms + extra).min(max_ms);
        }

        Duration::from_millis(delay_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32, initial_ms: u64, multiplier: f64, max_ms: u64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(initial_ms),
            multiplier,
            max_delay: Duration::from_millis(max_ms),
            jitter: 0.0,
            jitter_seed: None,
        })
    }

    #[test]
    fn test_exponential_growth_and_cap() {
        let policy = policy(10, 100, 2.0, 500);
        let delays: Vec<u64> = (1..=5)
            .map(|a| policy.should_retry(a, &FailureKind::status(503)).unwrap().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn test_budget_exhausted() {
        let policy = policy(3, 10, 2.0, 1000);
        assert!(policy.should_retry(3, &FailureKind::Timeout).is_some());
        assert!(policy.should_retry(4, &FailureKind::Timeout).is_none());
    }

    #[test]
    fn test_zero_retries() {
        let policy = policy(0, 10, 2.0, 1000);
        assert!(policy.should_retry(1, &FailureKind::Network).is_none());
    }

    #[test]
    fn test_permanent_failure_never_retried() {
        let policy = policy(5, 10, 2.0, 1000);
        assert!(policy.should_retry(1, &FailureKind::Permanent).is_none());
    }

    #[test]
    fn test_retry_after_raises_delay_within_cap() {
        let policy = policy(5, 100, 2.0, 2000);
        let failure = FailureKind::Status {
            code: 429,
            retry_after: Some(Duration::from_secs(1)),
        };
        assert_eq!(policy.should_retry(1, &failure), Some(Duration::from_secs(1)));

        let failure = FailureKind::Status {
            code: 429,
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(policy.should_retry(1, &failure), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_seeded_jitter_is_reproducible_and_bounded() {
        let config = RetryConfig {
            max_retries: 8,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: 0.5,
            jitter_seed: Some(42),
        };
        let first = RetryPolicy::new(config.clone());
        let second = RetryPolicy::new(config);

        for attempt in 1..=6 {
            let a = first.backoff(attempt);
            let b = second.backoff(attempt);
            assert_eq!(a, b);

            let base = 100u64 * 2u64.pow(attempt - 1);
            let ms = a.as_millis() as u64;
            assert!(ms >= base && ms <= base + base / 2, "attempt {attempt}: {ms}");
        }
    }

    #[test]
    fn test_validate() {
        assert!(RetryConfig::default().validate().is_ok());

        let mut config = RetryConfig::default();
        config.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = RetryConfig::default();
        config.max_delay = Duration::from_millis(10);
        assert!(config.validate().is_err());

        let mut config = RetryConfig::default();
        config.jitter = 1.5;
        assert!(config.validate().is_err());
    }
}
