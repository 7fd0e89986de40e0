//! Scheduler
//!
//! A tick does two independent things:
//! - triggers schedule workflows that are due, claiming each trigger with a
//!   compare-and-set on `last_run_at`
//! - sweeps the job queue: stale claims go back to `Queued`, and every run
//!   with a due queued job is processed again

mod cron;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{WorkflowDefinition, WorkflowTrigger};
use crate::persistence::AutomationStore;
use crate::processor::JobProcessor;
use crate::runs::{RunManager, TriggerSource};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

pub use cron::{CronError, CronSchedule};

/// Summary of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct TickReport {
    /// Schedule workflows triggered by this tick
    pub triggered_workflows: Vec<Uuid>,
    /// Runs created by those triggers
    pub created_runs: Vec<Uuid>,
    /// Runs re-processed because they had due jobs
    pub swept_runs: Vec<Uuid>,
    /// Jobs returned to the queue after a stale claim
    pub reclaimed_jobs: usize,
    /// Stored events that were never routed and got routed by this tick
    pub rerouted_events: Vec<Uuid>,
}

/// Periodic producer of schedule runs and sweeper of the job queue
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn AutomationStore>,
    runs: RunManager,
    processor: JobProcessor,
    stale_job_threshold: Duration,
    sweep_batch_size: usize,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn AutomationStore>,
        runs: RunManager,
        processor: JobProcessor,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            runs,
            processor,
            stale_job_threshold: config.stale_job_threshold,
            sweep_batch_size: config.sweep_batch_size,
        }
    }

    /// Run one tick as of `now`
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, EngineError> {
        let mut report = TickReport::default();

        for workflow in self.store.list_schedule_workflows().await? {
            match self.trigger_if_due(&workflow, now).await {
                Ok(Some(run_id)) => {
                    report.triggered_workflows.push(workflow.id);
                    report.created_runs.extend(run_id);
                }
                Ok(None) => {}
                Err(e) => warn!(workflow_id = %workflow.id, error = %e, "schedule trigger failed"),
            }
        }

        let swept = self.sweep(now, &mut report).await?;
        let mut to_process: Vec<Uuid> = report.created_runs.clone();
        let mut seen: HashSet<Uuid> = to_process.iter().copied().collect();
        for run_id in swept {
            if seen.insert(run_id) {
                report.swept_runs.push(run_id);
                to_process.push(run_id);
            }
        }

        let results = join_all(
            to_process
                .iter()
                .map(|run_id| self.processor.process_run_at(*run_id, now)),
        )
        .await;
        for (run_id, result) in to_process.iter().zip(results) {
            if let Err(e) = result {
                warn!(%run_id, error = %e, "failed to process run");
            }
        }

        if !report.triggered_workflows.is_empty() || !report.swept_runs.is_empty() {
            info!(
                triggered = report.triggered_workflows.len(),
                swept = report.swept_runs.len(),
                reclaimed = report.reclaimed_jobs,
                "scheduler tick"
            );
        }
        Ok(report)
    }

    /// Trigger a schedule workflow if due; `Ok(Some(..))` once this call
    /// won the `last_run_at` update
    ///
    /// The inner option is the created run, absent when the trigger was
    /// rejected by idempotency or enrollment.
    async fn trigger_if_due(
        &self,
        workflow: &WorkflowDefinition,
        now: DateTime<Utc>,
    ) -> Result<Option<Option<Uuid>>, EngineError> {
        let WorkflowTrigger::Schedule { cron } = &workflow.trigger else {
            return Ok(None);
        };

        if let Some(business_id) = &workflow.business_id {
            let enabled = self
                .store
                .get_settings(business_id)
                .await?
                .map_or(true, |s| s.automations_enabled);
            if !enabled {
                debug!(workflow_id = %workflow.id, %business_id, "automations disabled");
                return Ok(None);
            }
        }

        let schedule = CronSchedule::parse(cron)?;
        if !schedule.is_due(workflow.last_run_at, now) {
            return Ok(None);
        }

        let won = self
            .store
            .compare_and_set_last_run(workflow.id, workflow.last_run_at, now)
            .await?;
        if !won {
            debug!(workflow_id = %workflow.id, "schedule claimed by another tick");
            return Ok(None);
        }

        let outcome = self
            .runs
            .trigger(workflow, TriggerSource::Schedule(now), now)
            .await?;
        debug!(workflow_id = %workflow.id, ?outcome, "schedule triggered");
        Ok(Some(outcome.created_run()))
    }

    /// Reclaim stale jobs and collect runs whose next step is due
    async fn sweep(
        &self,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<Vec<Uuid>, EngineError> {
        let threshold = chrono::Duration::from_std(self.stale_job_threshold)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let reclaimed = self.store.reclaim_stale_jobs(now - threshold).await?;
        if !reclaimed.is_empty() {
            warn!(count = reclaimed.len(), "reclaimed stale job claims");
        }
        report.reclaimed_jobs = reclaimed.len();

        let runnable = self
            .store
            .list_runnable_jobs(now, self.sweep_batch_size)
            .await?;
        Ok(runnable.into_iter().map(|job| job.workflow_run_id).collect())
    }
}
