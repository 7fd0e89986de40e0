//! Automation engine facade
//!
//! Wires the pipeline together: an accepted event is routed, each resolved
//! workflow is triggered, and the created runs are handed to the processor
//! according to [`DispatchMode`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::actions::{ActionRegistry, EmailTransport};
use crate::config::{DispatchMode, EngineConfig};
use crate::error::EngineError;
use crate::ingest::{DuplicateReason, EventIngestor, IngestOutcome};
use crate::model::{
    AutomationSettings, Event, NewEvent, WorkflowDefinition, WorkflowJob, WorkflowRun,
    WorkflowTrigger,
};
use crate::persistence::AutomationStore;
use crate::processor::{JobProcessor, ProcessResult};
use crate::routing::IntentRouter;
use crate::runs::{RunManager, TriggerOutcome, TriggerSource};
use crate::scheduler::{CronSchedule, Scheduler, TickReport};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Result of submitting an event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// The event was already stored; nothing was triggered
    Duplicate {
        event_id: Uuid,
        reason: DuplicateReason,
    },

    /// The event was stored and routed
    Accepted {
        event_id: Uuid,
        /// Workflows resolved for the intent, in trigger order
        workflows: Vec<Uuid>,
        /// Trigger outcome per workflow that was triggered without error
        runs: Vec<TriggeredWorkflow>,
    },
}

/// Trigger outcome of one workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct TriggeredWorkflow {
    pub workflow_id: Uuid,
    #[serde(flatten)]
    pub outcome: TriggerOutcome,
}

impl SubmitOutcome {
    pub fn event_id(&self) -> Uuid {
        match self {
            Self::Duplicate { event_id, .. } | Self::Accepted { event_id, .. } => *event_id,
        }
    }

    /// Runs created by this submission
    pub fn created_runs(&self) -> Vec<Uuid> {
        match self {
            Self::Duplicate { .. } => vec![],
            Self::Accepted { runs, .. } => runs.iter().filter_map(|r| r.outcome.created_run()).collect(),
        }
    }
}

/// Single entry point of the automation pipeline
#[derive(Clone)]
pub struct AutomationEngine {
    store: Arc<dyn AutomationStore>,
    ingestor: EventIngestor,
    router: IntentRouter,
    runs: RunManager,
    processor: JobProcessor,
    scheduler: Scheduler,
    dispatch: DispatchMode,
    stale_event_threshold: std::time::Duration,
    sweep_batch_size: usize,
}

impl AutomationEngine {
    pub fn new(
        store: Arc<dyn AutomationStore>,
        registry: Arc<ActionRegistry>,
        config: &EngineConfig,
    ) -> Self {
        let runs = RunManager::new(store.clone());
        let processor = JobProcessor::new(store.clone(), registry, config);
        let scheduler = Scheduler::new(store.clone(), runs.clone(), processor.clone(), config);
        Self {
            ingestor: EventIngestor::new(store.clone()),
            router: IntentRouter::new(store.clone()),
            runs,
            processor,
            scheduler,
            dispatch: config.dispatch,
            stale_event_threshold: config.stale_event_threshold,
            sweep_batch_size: config.sweep_batch_size,
            store,
        }
    }

    /// Engine with the built-in action handlers
    pub fn with_default_actions(
        store: Arc<dyn AutomationStore>,
        email: Arc<dyn EmailTransport>,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        let registry = ActionRegistry::with_defaults(email, config.webhook_timeout)?;
        Ok(Self::new(store, Arc::new(registry), config))
    }

    pub fn store(&self) -> &Arc<dyn AutomationStore> {
        &self.store
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Submit an event now
    pub async fn submit_event(&self, event: NewEvent) -> Result<SubmitOutcome, EngineError> {
        self.submit_event_at(event, Utc::now()).await
    }

    /// Submit an event as of `now`
    ///
    /// A failure to trigger one workflow is logged and does not prevent the
    /// others from being triggered. Resubmitting the dedupe key of an event
    /// that was stored but never routed routes the stored event.
    #[instrument(skip(self, event), fields(business_id = %event.business_id, intent = %event.intent))]
    pub async fn submit_event_at(
        &self,
        event: NewEvent,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, EngineError> {
        let event = match self.ingestor.ingest_at(event, now).await? {
            IngestOutcome::Accepted(event) => event,
            IngestOutcome::Duplicate { event_id, reason } => {
                match self.unrouted_duplicate(event_id, reason).await? {
                    Some(event) => {
                        info!(%event_id, "routing event left unrouted by an earlier submission");
                        event
                    }
                    None => return Ok(SubmitOutcome::Duplicate { event_id, reason }),
                }
            }
        };

        let outcome = self.route(&event, now).await?;
        self.dispatch(outcome.created_runs(), now).await;
        Ok(outcome)
    }

    /// The stored event behind a key duplicate, if it was never routed
    async fn unrouted_duplicate(
        &self,
        event_id: Uuid,
        reason: DuplicateReason,
    ) -> Result<Option<Event>, EngineError> {
        if reason != DuplicateReason::DedupeKey {
            return Ok(None);
        }
        Ok(self
            .store
            .get_event(event_id)
            .await?
            .filter(|event| !event.processed))
    }

    /// Trigger every workflow resolved for a stored event, then mark it processed
    ///
    /// Routing an event twice creates no second run: triggers are idempotent
    /// per `(event, workflow)`.
    async fn route(&self, event: &Event, now: DateTime<Utc>) -> Result<SubmitOutcome, EngineError> {
        let workflows = self.router.resolve(&event.business_id, &event.intent).await?;

        let mut runs = Vec::with_capacity(workflows.len());
        for workflow in &workflows {
            match self.runs.trigger(workflow, TriggerSource::Event(event), now).await {
                Ok(outcome) => runs.push(TriggeredWorkflow {
                    workflow_id: workflow.id,
                    outcome,
                }),
                Err(e) => {
                    error!(workflow_id = %workflow.id, error = %e, "Failed to trigger workflow")
                }
            }
        }

        self.store.mark_event_processed(event.id).await?;

        let outcome = SubmitOutcome::Accepted {
            event_id: event.id,
            workflows: workflows.iter().map(|w| w.id).collect(),
            runs,
        };
        info!(
            event_id = %event.id,
            workflows = workflows.len(),
            runs = outcome.created_runs().len(),
            "event routed"
        );
        Ok(outcome)
    }

    /// Route events whose submission stored them but failed before routing
    async fn route_stranded_events(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, EngineError> {
        let Some(cutoff) = chrono::Duration::from_std(self.stale_event_threshold)
            .ok()
            .and_then(|threshold| now.checked_sub_signed(threshold))
        else {
            return Ok(vec![]);
        };

        let stranded = self
            .store
            .list_unprocessed_events(cutoff, self.sweep_batch_size)
            .await?;

        let mut routed = Vec::with_capacity(stranded.len());
        for event in stranded {
            match self.route(&event, now).await {
                Ok(_) => routed.push(event.id),
                Err(e) => error!(event_id = %event.id, error = %e, "Failed to route stranded event"),
            }
        }
        if !routed.is_empty() {
            warn!(count = routed.len(), "routed stranded events");
        }
        Ok(routed)
    }

    async fn dispatch(&self, run_ids: Vec<Uuid>, now: DateTime<Utc>) {
        match self.dispatch {
            DispatchMode::Inline => {
                for run_id in run_ids {
                    if let Err(e) = self.processor.process_run_at(run_id, now).await {
                        warn!(%run_id, error = %e, "failed to process run");
                    }
                }
            }
            DispatchMode::Background => {
                for run_id in run_ids {
                    let processor = self.processor.clone();
                    tokio::spawn(async move {
                        if let Err(e) = processor.process_run(run_id).await {
                            warn!(%run_id, error = %e, "failed to process run");
                        }
                    });
                }
            }
        }
    }

    pub async fn get_event(&self, event_id: Uuid) -> Result<Event, EngineError> {
        self.store
            .get_event(event_id)
            .await?
            .ok_or_else(|| EngineError::lookup("event", event_id))
    }

    /// Workflows an event with this intent would start
    pub async fn resolve(
        &self,
        business_id: &str,
        intent: &str,
    ) -> Result<Vec<WorkflowDefinition>, EngineError> {
        self.router.resolve(business_id, intent).await
    }

    // =========================================================================
    // Runs
    // =========================================================================

    pub async fn process_run(&self, run_id: Uuid) -> Result<ProcessResult, EngineError> {
        self.processor.process_run(run_id).await
    }

    pub async fn process_run_at(
        &self,
        run_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ProcessResult, EngineError> {
        self.processor.process_run_at(run_id, now).await
    }

    /// A run with its jobs in step order
    pub async fn run_status(
        &self,
        run_id: Uuid,
    ) -> Result<(WorkflowRun, Vec<WorkflowJob>), EngineError> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| EngineError::lookup("run", run_id))?;
        let jobs = self.store.list_jobs(run_id).await?;
        Ok((run, jobs))
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Route stranded events, then run one scheduler tick
    ///
    /// Runs created for stranded events are picked up by the tick's sweep.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, EngineError> {
        let rerouted = self.route_stranded_events(now).await?;
        let mut report = self.scheduler.tick(now).await?;
        report.rerouted_events = rerouted;
        Ok(report)
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Validate and store a workflow definition
    pub async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), EngineError> {
        if workflow.name.trim().is_empty() {
            return Err(EngineError::InvalidInput("workflow name must not be empty".into()));
        }
        if workflow.business_id.is_none() && workflow.recipe_id.is_none() {
            return Err(EngineError::InvalidInput(
                "workflow must belong to a business or a recipe".into(),
            ));
        }
        if let WorkflowTrigger::Schedule { cron } = &workflow.trigger {
            CronSchedule::parse(cron)?;
        }

        self.store.save_workflow(workflow).await?;
        debug!(workflow_id = %workflow.id, "workflow saved");
        Ok(())
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> Result<WorkflowDefinition, EngineError> {
        self.store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::lookup("workflow", workflow_id))
    }

    pub async fn save_settings(&self, settings: &AutomationSettings) -> Result<(), EngineError> {
        if settings.business_id.trim().is_empty() {
            return Err(EngineError::InvalidInput("business_id must not be empty".into()));
        }
        self.store.save_settings(settings).await?;
        Ok(())
    }

    /// Stored settings, or the defaults when none were saved
    pub async fn settings(&self, business_id: &str) -> Result<AutomationSettings, EngineError> {
        Ok(self
            .store
            .get_settings(business_id)
            .await?
            .unwrap_or_else(|| AutomationSettings::defaults_for(business_id)))
    }
}
