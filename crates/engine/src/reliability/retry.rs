//! Retry policy for failed jobs

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the delay grows with the retry count
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `retry_count * backoff_unit` (1, 2, 3 units)
    #[default]
    Linear,

    /// `backoff_unit * 2^(retry_count - 1)` (1, 2, 4 units)
    Exponential,
}

/// Configuration for job retries
///
/// A job that fails is requeued until it has failed `max_retries` times,
/// after which it is marked failed permanently.
///
/// # Example
///
/// ```
/// use flowline_engine::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::linear()
///     .with_max_retries(3)
///     .with_backoff_unit(Duration::from_secs(60));
///
/// // First retry after 1 minute
/// // Second retry after 2 minutes
/// assert_eq!(policy.delay_for_retry(2), Duration::from_secs(120));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Failures after which a job is failed permanently
    pub max_retries: u32,

    /// Base delay unit
    #[serde(with = "duration_millis")]
    pub backoff_unit: Duration,

    /// Maximum delay between retries
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Jitter factor (0.0-1.0) to add randomness
    ///
    /// A value of 0.1 means +/-10% randomness.
    #[serde(default)]
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear()
    }
}

impl RetryPolicy {
    /// Linear backoff with the engine defaults
    ///
    /// - 3 max retries
    /// - 1 minute unit
    /// - 1 hour max interval
    /// - no jitter
    pub fn linear() -> Self {
        Self {
            max_retries: 3,
            backoff_unit: Duration::from_secs(60),
            max_interval: Duration::from_secs(3600),
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
        }
    }

    /// Exponential backoff with the engine defaults and 10% jitter
    pub fn exponential() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
            ..Self::linear()
        }
    }

    /// A policy that fails on the first error
    pub fn no_retry() -> Self {
        Self {
            max_retries: 1,
            ..Self::linear()
        }
    }

    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff unit
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Set the maximum retry interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the backoff strategy
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before the retry that follows the `retry_count`-th failure
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }

        let unit = self.backoff_unit.as_secs_f64();
        let base = match self.strategy {
            BackoffStrategy::Linear => unit * f64::from(retry_count),
            BackoffStrategy::Exponential => unit * 2f64.powi(retry_count as i32 - 1),
        };
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped * self.jitter;
            let jitter_offset = rng.gen_range(-jitter_range..jitter_range);
            (capped + jitter_offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Whether a job with `retry_count` failures may be retried
    pub fn has_retries_remaining(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
