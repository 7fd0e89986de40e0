//! Schedule expressions
//!
//! Grammar: `@hourly | @daily | @weekly | */N` where `N` is minutes.

use chrono::{DateTime, Duration, Utc};

/// Error parsing a schedule expression
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("empty schedule expression")]
    Empty,

    #[error("unsupported schedule expression: {0}")]
    Unsupported(String),

    #[error("invalid minute interval in {0:?}")]
    InvalidInterval(String),
}

/// A parsed schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronSchedule {
    Hourly,
    Daily,
    Weekly,
    EveryMinutes(u32),
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(CronError::Empty);
        }

        match expression.to_ascii_lowercase().as_str() {
            "@hourly" => return Ok(Self::Hourly),
            "@daily" => return Ok(Self::Daily),
            "@weekly" => return Ok(Self::Weekly),
            _ => {}
        }

        let minutes = expression
            .strip_prefix("*/")
            .ok_or_else(|| CronError::Unsupported(expression.to_string()))?;
        match minutes.trim().parse::<u32>() {
            Ok(n) if n > 0 => Ok(Self::EveryMinutes(n)),
            _ => Err(CronError::InvalidInterval(expression.to_string())),
        }
    }

    /// Minimum time between two runs
    pub fn interval(&self) -> Duration {
        match self {
            Self::Hourly => Duration::hours(1),
            Self::Daily => Duration::days(1),
            Self::Weekly => Duration::weeks(1),
            Self::EveryMinutes(n) => Duration::minutes(i64::from(*n)),
        }
    }

    /// Whether a workflow last run at `last_run` is due at `now`
    ///
    /// A workflow that never ran is due.
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_run {
            None => true,
            Some(last) => now - last >= self.interval(),
        }
    }

    /// Earliest instant the workflow is due again
    pub fn next_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
        match last_run {
            None => now,
            Some(last) => last + self.interval(),
        }
    }
}

impl std::str::FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(CronSchedule::parse("@hourly"), Ok(CronSchedule::Hourly));
        assert_eq!(CronSchedule::parse(" @Daily "), Ok(CronSchedule::Daily));
        assert_eq!(CronSchedule::parse("@weekly"), Ok(CronSchedule::Weekly));
        assert_eq!(CronSchedule::parse("*/5"), Ok(CronSchedule::EveryMinutes(5)));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(CronSchedule::parse(""), Err(CronError::Empty));
        assert!(matches!(CronSchedule::parse("0 9 * * 1"), Err(CronError::Unsupported(_))));
        assert!(matches!(CronSchedule::parse("*/0"), Err(CronError::InvalidInterval(_))));
        assert!(matches!(CronSchedule::parse("*/x"), Err(CronError::InvalidInterval(_))));
    }

    #[test]
    fn test_every_five_minutes() {
        let schedule = CronSchedule::EveryMinutes(5);
        let now = Utc::now();

        assert!(schedule.is_due(None, now));
        assert!(!schedule.is_due(Some(now - Duration::minutes(3)), now));
        assert!(schedule.is_due(Some(now - Duration::minutes(5)), now));
        assert!(schedule.is_due(Some(now - Duration::minutes(7)), now));
    }

    #[test]
    fn test_next_due() {
        let now = Utc::now();
        let last = now - Duration::minutes(30);

        assert_eq!(CronSchedule::Hourly.next_due(Some(last), now), last + Duration::hours(1));
        assert_eq!(CronSchedule::Daily.next_due(None, now), now);
    }
}
