//! Delay steps
//!
//! A delay never sleeps. The first execution reschedules the job to the end
//! of the delay and stores the resume instant in the job result; the job then
//! completes when it is claimed again at or after that instant.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_config, ActionContext, ActionError, ActionHandler, ActionKind, ActionOutcome};

#[derive(Debug, Default, Deserialize)]
struct DelayConfig {
    #[serde(default)]
    seconds: Option<u64>,
    #[serde(default)]
    minutes: Option<u64>,
    #[serde(default)]
    hours: Option<u64>,
    #[serde(default)]
    days: Option<u64>,
}

impl DelayConfig {
    fn total(&self) -> Result<Duration, ActionError> {
        let seconds = [
            (self.seconds, 1u64),
            (self.minutes, 60),
            (self.hours, 3_600),
            (self.days, 86_400),
        ]
        .into_iter()
        .try_fold(0u64, |acc, (value, unit)| {
            value
                .unwrap_or(0)
                .checked_mul(unit)
                .and_then(|s| acc.checked_add(s))
        })
        .and_then(|s| i64::try_from(s).ok())
        .ok_or_else(|| ActionError::invalid_config("delay is too long"))?;

        Duration::try_seconds(seconds).ok_or_else(|| ActionError::invalid_config("delay is too long"))
    }
}

fn resume_at(job_result: Option<&Value>) -> Option<DateTime<Utc>> {
    job_result
        .and_then(|r| r.get("resume_at"))
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// Waits by rescheduling the job
pub struct DelayAction;

#[async_trait]
impl ActionHandler for DelayAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Delay
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        config: &Value,
    ) -> Result<ActionOutcome, ActionError> {
        let config: DelayConfig = parse_config(config)?;
        let delay = config.total()?;

        if let Some(until) = resume_at(ctx.job.result.as_ref()) {
            if ctx.now < until {
                return Ok(ActionOutcome::Reschedule {
                    until,
                    result: json!({ "resume_at": until }),
                });
            }
            return Ok(ActionOutcome::Completed(json!({
                "action": ActionKind::Delay.as_str(),
                "waited_until": until,
                "resumed_at": ctx.now,
            })));
        }

        if delay <= Duration::zero() {
            return Ok(ActionOutcome::Completed(json!({
                "action": ActionKind::Delay.as_str(),
                "waited_until": ctx.now,
                "resumed_at": ctx.now,
            })));
        }

        let until = ctx.now + delay;
        Ok(ActionOutcome::Reschedule {
            until,
            result: json!({ "resume_at": until }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing;
    use crate::persistence::InMemoryAutomationStore;

    async fn execute(
        job_result: Option<Value>,
        config: Value,
        now: DateTime<Utc>,
    ) -> ActionOutcome {
        let store = InMemoryAutomationStore::new();
        let run = testing::run(json!({}));
        let mut job = testing::job(&run, ActionKind::Delay);
        job.result = job_result;
        let scope = json!({});
        let ctx = ActionContext {
            store: &store,
            run: &run,
            job: &job,
            scope: &scope,
            now,
        };
        DelayAction.execute(&ctx, &config).await.unwrap()
    }

    #[tokio::test]
    async fn test_first_execution_reschedules() {
        let now = Utc::now();
        let outcome = execute(None, json!({"minutes": 5}), now).await;

        assert_eq!(
            outcome,
            ActionOutcome::Reschedule {
                until: now + Duration::minutes(5),
                result: json!({"resume_at": now + Duration::minutes(5)}),
            }
        );
    }

    #[tokio::test]
    async fn test_completes_after_resume_instant() {
        let now = Utc::now();
        let until = now + Duration::hours(1);
        let state = json!({ "resume_at": until });

        let early = execute(Some(state.clone()), json!({"hours": 1}), now).await;
        assert!(matches!(early, ActionOutcome::Reschedule { .. }));

        let on_time = execute(Some(state), json!({"hours": 1}), until).await;
        assert!(matches!(on_time, ActionOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_zero_delay_completes() {
        let outcome = execute(None, json!({}), Utc::now()).await;
        assert!(matches!(outcome, ActionOutcome::Completed(_)));
    }

    #[test]
    fn test_total_combines_units() {
        let config = DelayConfig {
            seconds: Some(30),
            minutes: Some(1),
            hours: Some(1),
            days: None,
        };
        assert_eq!(config.total().unwrap(), Duration::seconds(3_690));

        let huge = DelayConfig {
            days: Some(u64::MAX),
            ..Default::default()
        };
        assert!(huge.total().is_err());
    }
}
