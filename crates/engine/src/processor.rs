//! Job processor
//!
//! Executes the jobs of one run in step order. Each pass claims the next
//! runnable job, executes it and records the outcome, and stops at the first
//! job that cannot run yet. When no job is left queued or processing the run
//! is finalized.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::actions::{render, ActionContext, ActionError, ActionKind, ActionOutcome, ActionRegistry};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{JobStatus, RunStatus, WorkflowJob, WorkflowRun};
use crate::persistence::AutomationStore;
use crate::reliability::RetryPolicy;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Summary of one processing pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ProcessResult {
    pub run_id: Uuid,
    /// Run status after the pass
    pub status: RunStatus,
    /// Jobs executed during this pass
    pub executed: usize,
    /// Jobs put back in the queue (retry or delay)
    pub requeued: usize,
    /// Whether this pass moved the run to a terminal status
    pub finalized: bool,
}

/// What happened to a claimed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobDisposition {
    Completed,
    Requeued,
    Failed,
    Halted,
}

/// Runs the jobs of workflow runs
#[derive(Clone)]
pub struct JobProcessor {
    store: Arc<dyn AutomationStore>,
    registry: Arc<ActionRegistry>,
    retry: RetryPolicy,
    action_timeout: Duration,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn AutomationStore>,
        registry: Arc<ActionRegistry>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            retry: config.retry.clone(),
            action_timeout: config.action_timeout,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Process a run now
    pub async fn process_run(&self, run_id: Uuid) -> Result<ProcessResult, EngineError> {
        self.process_run_at(run_id, Utc::now()).await
    }

    /// Process a run as of `now`
    ///
    /// Safe to call repeatedly and concurrently: jobs are claimed before they
    /// execute, and a pass that loses a claim stops.
    #[instrument(skip(self))]
    pub async fn process_run_at(
        &self,
        run_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ProcessResult, EngineError> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| EngineError::lookup("run", run_id))?;

        let mut result = ProcessResult {
            run_id,
            status: run.status,
            executed: 0,
            requeued: 0,
            finalized: false,
        };
        if run.status.is_terminal() {
            debug!(status = %run.status, "run already finalized");
            return Ok(result);
        }

        let mut jobs = self.store.list_jobs(run_id).await?;

        for index in 0..jobs.len() {
            let job = &jobs[index];
            if job.status.is_terminal() {
                continue;
            }
            if job.status == JobStatus::Processing {
                debug!(job_id = %job.id, "job claimed elsewhere");
                break;
            }
            if job.scheduled_at > now {
                debug!(job_id = %job.id, scheduled_at = %job.scheduled_at, "job not due");
                break;
            }
            if !self.store.claim_job(job.id, now).await? {
                debug!(job_id = %job.id, "lost job claim");
                break;
            }

            let scope = step_scope(&run, &jobs[..index]);
            let (disposition, job_result) = self.execute_job(&run, job, &scope, now).await?;
            result.executed += 1;

            jobs[index].result = job_result;
            match disposition {
                JobDisposition::Completed => {
                    jobs[index].status = JobStatus::Completed;
                }
                JobDisposition::Requeued => {
                    result.requeued += 1;
                    break;
                }
                JobDisposition::Failed => {
                    self.skip_remaining(&jobs[index + 1..], "previous step failed", now)
                        .await?;
                    break;
                }
                JobDisposition::Halted => {
                    self.skip_remaining(&jobs[index + 1..], "condition not met", now)
                        .await?;
                    break;
                }
            }
        }

        let jobs = self.store.list_jobs(run_id).await?;
        let pending = jobs.iter().any(|j| !j.status.is_terminal());
        if pending {
            result.status = RunStatus::Running;
            return Ok(result);
        }

        let status = RunStatus::derive(jobs.iter().map(|j| &j.status));
        self.store
            .finalize_run(run_id, status, summarize(&jobs), now)
            .await?;
        info!(%run_id, %status, jobs = jobs.len(), "run finalized");

        result.status = status;
        result.finalized = true;
        Ok(result)
    }

    /// Execute a claimed job and persist its outcome
    async fn execute_job(
        &self,
        run: &WorkflowRun,
        job: &WorkflowJob,
        scope: &Value,
        now: DateTime<Utc>,
    ) -> Result<(JobDisposition, Option<Value>), EngineError> {
        let kind = match job.action_type.parse::<ActionKind>() {
            Ok(kind) => kind,
            Err(reason) => {
                warn!(job_id = %job.id, action_type = %job.action_type, "unknown action type");
                return self.skip_job(job, &reason, now).await;
            }
        };
        let Some(handler) = self.registry.get(kind) else {
            warn!(job_id = %job.id, %kind, "no handler registered");
            let reason = format!("no handler registered for {kind}");
            return self.skip_job(job, &reason, now).await;
        };

        let config = match render(&job.action_config, scope) {
            Ok(config) => config,
            Err(error) => return self.handle_failure(job, kind, error, now).await,
        };
        let ctx = ActionContext {
            store: self.store.as_ref(),
            run,
            job,
            scope,
            now,
        };

        let outcome = tokio::time::timeout(self.action_timeout, handler.execute(&ctx, &config))
            .await
            .unwrap_or_else(|_| {
                Err(ActionError::retryable(format!(
                    "action timed out after {:?}",
                    self.action_timeout
                )))
            });

        match outcome {
            Ok(ActionOutcome::Completed(value)) => {
                self.store.complete_job(job.id, value.clone(), now).await?;
                debug!(job_id = %job.id, %kind, "job completed");
                Ok((JobDisposition::Completed, Some(value)))
            }
            Ok(ActionOutcome::Halt(value)) => {
                self.store.complete_job(job.id, value.clone(), now).await?;
                info!(job_id = %job.id, %kind, "run halted by step");
                Ok((JobDisposition::Halted, Some(value)))
            }
            Ok(ActionOutcome::Reschedule { until, result }) => {
                self.store
                    .requeue_job(job.id, job.retry_count, until, None, Some(result.clone()))
                    .await?;
                debug!(job_id = %job.id, %until, "job rescheduled");
                Ok((JobDisposition::Requeued, Some(result)))
            }
            Err(error) => self.handle_failure(job, kind, error, now).await,
        }
    }

    async fn handle_failure(
        &self,
        job: &WorkflowJob,
        kind: ActionKind,
        error: ActionError,
        now: DateTime<Utc>,
    ) -> Result<(JobDisposition, Option<Value>), EngineError> {
        let retry_count = job.retry_count + 1;

        if error.retryable && self.retry.has_retries_remaining(retry_count) {
            let delay = self.retry.delay_for_retry(retry_count);
            let scheduled_at = after(now, delay);
            self.store
                .requeue_job(job.id, retry_count, scheduled_at, Some(&error.message), None)
                .await?;
            warn!(
                job_id = %job.id,
                %kind,
                retry_count,
                %scheduled_at,
                error = %error,
                "job failed, retry scheduled"
            );
            return Ok((JobDisposition::Requeued, job.result.clone()));
        }

        self.store
            .fail_job(job.id, retry_count, &error.message, now)
            .await?;
        warn!(
            job_id = %job.id,
            %kind,
            retry_count,
            retryable = error.retryable,
            error = %error,
            "job failed permanently"
        );
        Ok((JobDisposition::Failed, None))
    }

    /// Complete a claimed job without running it
    async fn skip_job(
        &self,
        job: &WorkflowJob,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(JobDisposition, Option<Value>), EngineError> {
        let result = skipped(&job.action_type, reason);
        self.store.complete_job(job.id, result.clone(), now).await?;
        Ok((JobDisposition::Completed, Some(result)))
    }

    /// Claim and skip every queued job in `jobs`
    async fn skip_remaining(
        &self,
        jobs: &[WorkflowJob],
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        for job in jobs.iter().filter(|j| j.status == JobStatus::Queued) {
            // Remaining jobs were queued at run creation, so they are due
            let claim_at = now.max(job.scheduled_at);
            if self.store.claim_job(job.id, claim_at).await? {
                self.store
                    .complete_job(job.id, skipped(&job.action_type, reason), now)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Run context plus prior step results under `steps`, indexed by step
fn step_scope(run: &WorkflowRun, prior: &[WorkflowJob]) -> Value {
    let mut scope = match &run.context {
        Value::Object(_) => run.context.clone(),
        Value::Null => json!({}),
        other => json!({ "context": other }),
    };
    let steps: Vec<Value> = prior
        .iter()
        .map(|j| j.result.clone().unwrap_or(Value::Null))
        .collect();
    scope["steps"] = Value::Array(steps);
    scope["run_id"] = json!(run.id);
    scope
}

fn skipped(action_type: &str, reason: &str) -> Value {
    json!({
        "action": action_type,
        "skipped": true,
        "reason": reason,
    })
}

fn summarize(jobs: &[WorkflowJob]) -> Value {
    let skipped = jobs.iter().filter(|j| j.is_skipped()).count();
    let failed = jobs.iter().filter(|j| j.status == JobStatus::Failed).count();
    let completed = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed && !j.is_skipped())
        .count();

    json!({
        "total": jobs.len(),
        "completed": completed,
        "failed": failed,
        "skipped": skipped,
    })
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionHandler, ActionRegistry, DelayAction};
    use crate::model::{Step, WorkflowDefinition, WorkflowTrigger};
    use crate::persistence::InMemoryAutomationStore;
    use crate::runs::{RunManager, TriggerSource};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Webhook stand-in that fails a fixed number of times
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        retryable: bool,
    }

    #[async_trait]
    impl ActionHandler for Flaky {
        fn kind(&self) -> ActionKind {
            ActionKind::Webhook
        }

        async fn execute(
            &self,
            ctx: &ActionContext<'_>,
            config: &Value,
        ) -> Result<ActionOutcome, ActionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                let error = format!("attempt {} failed", call + 1);
                return Err(if self.retryable {
                    ActionError::retryable(error)
                } else {
                    ActionError::non_retryable(error)
                });
            }
            Ok(ActionOutcome::Completed(json!({
                "action": "webhook",
                "echo": config,
                "prior": ctx.scope["steps"].clone(),
            })))
        }
    }

    struct Echo(ActionKind);

    #[async_trait]
    impl ActionHandler for Echo {
        fn kind(&self) -> ActionKind {
            self.0
        }

        async fn execute(
            &self,
            _ctx: &ActionContext<'_>,
            config: &Value,
        ) -> Result<ActionOutcome, ActionError> {
            Ok(ActionOutcome::Completed(json!({ "action": self.0.as_str(), "echo": config })))
        }
    }

    async fn setup(
        steps: Vec<Step>,
        flaky: Flaky,
    ) -> (Arc<InMemoryAutomationStore>, JobProcessor, Uuid, DateTime<Utc>) {
        let store = Arc::new(InMemoryAutomationStore::new());
        let mut registry = ActionRegistry::new();
        registry.register(Echo(ActionKind::CreateContact));
        registry.register(Echo(ActionKind::CreateActivity));
        registry.register(DelayAction);
        registry.register(flaky);

        let processor = JobProcessor::new(
            store.clone(),
            Arc::new(registry),
            &EngineConfig::default(),
        );

        let mut workflow = WorkflowDefinition::new("Test", WorkflowTrigger::schedule("@daily"));
        for step in steps {
            workflow = workflow.with_step(step);
        }
        let now = Utc::now();
        let run_id = RunManager::new(store.clone())
            .trigger(&workflow, TriggerSource::Schedule(now), now)
            .await
            .unwrap()
            .created_run()
            .unwrap();

        (store, processor, run_id, now)
    }

    fn flaky(failures: u32) -> Flaky {
        Flaky {
            failures,
            calls: AtomicU32::new(0),
            retryable: true,
        }
    }

    fn three_steps() -> Vec<Step> {
        vec![
            Step::new("create_contact", json!({"email": "a@b.c"})),
            Step::new("webhook", json!({"url": "http://hooks.test", "contact": "{{steps.0.echo.email}}"})),
            Step::new("create_activity", json!({})),
        ]
    }

    #[tokio::test]
    async fn test_runs_all_steps_in_order() {
        let (store, processor, run_id, now) = setup(three_steps(), flaky(0)).await;

        let result = processor.process_run_at(run_id, now).await.unwrap();

        assert_eq!(result.executed, 3);
        assert!(result.finalized);
        assert_eq!(result.status, RunStatus::Completed);

        let jobs = store.list_jobs(run_id).await.unwrap();
        // Step 1 saw step 0's result through the template scope
        assert_eq!(jobs[1].result.as_ref().unwrap()["echo"]["contact"], "a@b.c");

        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(
            run.result,
            Some(json!({"total": 3, "completed": 3, "failed": 0, "skipped": 0}))
        );
    }

    #[tokio::test]
    async fn test_failure_requeues_with_backoff() {
        let (store, processor, run_id, now) = setup(three_steps(), flaky(1)).await;

        let result = processor.process_run_at(run_id, now).await.unwrap();
        assert_eq!(result.status, RunStatus::Running);
        assert_eq!(result.requeued, 1);

        let jobs = store.list_jobs(run_id).await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[1].status, JobStatus::Queued);
        assert_eq!(jobs[1].retry_count, 1);
        assert_eq!(jobs[1].scheduled_at, now + chrono::Duration::minutes(1));
        assert_eq!(jobs[1].error_message.as_deref(), Some("attempt 1 failed"));
        assert_eq!(jobs[2].status, JobStatus::Queued);

        // Not due yet: nothing runs
        let early = processor
            .process_run_at(run_id, now + chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(early.executed, 0);

        let later = processor
            .process_run_at(run_id, now + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(later.status, RunStatus::Completed);
        assert_eq!(later.executed, 2);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_skips_rest() {
        let failing = Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
            retryable: false,
        };
        let (store, processor, run_id, now) = setup(three_steps(), failing).await;

        let result = processor.process_run_at(run_id, now).await.unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.finalized);

        let jobs = store.list_jobs(run_id).await.unwrap();
        assert_eq!(jobs[1].status, JobStatus::Failed);
        assert_eq!(jobs[1].retry_count, 1);
        assert!(jobs[2].is_skipped());

        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.result.unwrap()["skipped"], 1);
    }

    #[tokio::test]
    async fn test_unknown_action_is_skipped() {
        let steps = vec![
            Step::new("launch_rocket", json!({})),
            Step::new("create_activity", json!({})),
        ];
        let (store, processor, run_id, now) = setup(steps, flaky(0)).await;

        let result = processor.process_run_at(run_id, now).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);

        let jobs = store.list_jobs(run_id).await.unwrap();
        assert!(jobs[0].is_skipped());
        assert_eq!(jobs[0].result.as_ref().unwrap()["reason"], "unknown action type: launch_rocket");
        assert_eq!(jobs[1].status, JobStatus::Completed);
        assert!(!jobs[1].is_skipped());
    }

    #[tokio::test]
    async fn test_delay_reschedules_instead_of_sleeping() {
        let steps = vec![
            Step::new("delay", json!({"minutes": 10})),
            Step::new("create_activity", json!({})),
        ];
        let (store, processor, run_id, now) = setup(steps, flaky(0)).await;

        let first = processor.process_run_at(run_id, now).await.unwrap();
        assert_eq!(first.status, RunStatus::Running);

        let jobs = store.list_jobs(run_id).await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Queued);
        assert_eq!(jobs[0].retry_count, 0);
        assert_eq!(jobs[0].scheduled_at, now + chrono::Duration::minutes(10));

        let done = processor
            .process_run_at(run_id, now + chrono::Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(done.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_finalized_run_is_not_reprocessed() {
        let (_, processor, run_id, now) = setup(three_steps(), flaky(0)).await;

        processor.process_run_at(run_id, now).await.unwrap();
        let again = processor.process_run_at(run_id, now).await.unwrap();

        assert_eq!(again.executed, 0);
        assert!(!again.finalized);
        assert_eq!(again.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_run() {
        let (_, processor, _, _) = setup(vec![], flaky(0)).await;
        let err = processor.process_run(Uuid::now_v7()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
