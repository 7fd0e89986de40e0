//! Engine configuration

use std::time::Duration;

use crate::reliability::{BackoffStrategy, RetryPolicy};

/// How the facade runs the processor for newly created runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Process runs before `submit_event` returns
    #[default]
    Inline,

    /// Spawn one tokio task per run
    Background,
}

impl std::str::FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inline" => Ok(Self::Inline),
            "background" => Ok(Self::Background),
            other => Err(format!("unknown dispatch mode: {other}")),
        }
    }
}

/// Configuration for the automation engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retry policy for failed jobs
    pub retry: RetryPolicy,
    /// Upper bound on one action execution
    pub action_timeout: Duration,
    /// Timeout of outbound webhook requests
    pub webhook_timeout: Duration,
    /// `Processing` jobs claimed longer ago are returned to the queue
    pub stale_job_threshold: Duration,
    /// Events still unrouted this long after they occurred are routed by the tick
    pub stale_event_threshold: Duration,
    /// Maximum due jobs read per sweep
    pub sweep_batch_size: usize,
    pub dispatch: DispatchMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            action_timeout: Duration::from_secs(30),
            webhook_timeout: Duration::from_secs(10),
            stale_job_threshold: Duration::from_secs(15 * 60),
            stale_event_threshold: Duration::from_secs(5 * 60),
            sweep_batch_size: 500,
            dispatch: DispatchMode::Inline,
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut retry = defaults.retry.clone();
        if let Some(max) = env_parse("FLOWLINE_MAX_RETRIES") {
            retry = retry.with_max_retries(max);
        }
        if let Some(secs) = env_parse("FLOWLINE_BACKOFF_UNIT_SECS") {
            retry = retry.with_backoff_unit(Duration::from_secs(secs));
        }
        if std::env::var("FLOWLINE_BACKOFF").as_deref() == Ok("exponential") {
            retry = retry.with_strategy(BackoffStrategy::Exponential);
        }
        if let Some(jitter) = env_parse("FLOWLINE_BACKOFF_JITTER") {
            retry = retry.with_jitter(jitter);
        }

        Self {
            retry,
            action_timeout: env_parse("FLOWLINE_ACTION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.action_timeout),
            webhook_timeout: env_parse("FLOWLINE_WEBHOOK_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.webhook_timeout),
            stale_job_threshold: env_parse("FLOWLINE_STALE_JOB_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_job_threshold),
            stale_event_threshold: env_parse("FLOWLINE_STALE_EVENT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_event_threshold),
            sweep_batch_size: env_parse("FLOWLINE_SWEEP_BATCH_SIZE")
                .unwrap_or(defaults.sweep_batch_size),
            dispatch: env_parse("FLOWLINE_DISPATCH").unwrap_or(defaults.dispatch),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn with_webhook_timeout(mut self, timeout: Duration) -> Self {
        self.webhook_timeout = timeout;
        self
    }

    pub fn with_stale_job_threshold(mut self, threshold: Duration) -> Self {
        self.stale_job_threshold = threshold;
        self
    }

    pub fn with_stale_event_threshold(mut self, threshold: Duration) -> Self {
        self.stale_event_threshold = threshold;
        self
    }

    pub fn with_sweep_batch_size(mut self, size: usize) -> Self {
        self.sweep_batch_size = size;
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
