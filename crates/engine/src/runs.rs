//! Workflow run creation
//!
//! A trigger becomes at most one run per idempotency key. The run's jobs are
//! a snapshot of the workflow's steps at creation time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::enrollment::EnrollmentGuard;
use crate::error::EngineError;
use crate::model::{Event, RunStatus, WorkflowDefinition, WorkflowJob, WorkflowRun};
use crate::persistence::{AutomationStore, InsertOutcome};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// What started a run
#[derive(Debug, Clone, Copy)]
pub enum TriggerSource<'a> {
    /// A routed business event
    Event(&'a Event),

    /// A scheduler tick at the given instant
    Schedule(DateTime<Utc>),
}

impl TriggerSource<'_> {
    /// Idempotency key of a run of `workflow_id` for this trigger
    pub fn idempotency_key(&self, workflow_id: Uuid) -> String {
        match self {
            Self::Event(event) => format!("{}:{}", event.id, workflow_id),
            Self::Schedule(at) => format!("schedule:{}:{}", workflow_id, at.timestamp()),
        }
    }

    fn contact_id(&self) -> Option<Uuid> {
        match self {
            Self::Event(event) => event.contact_id,
            Self::Schedule(_) => None,
        }
    }

    fn event_id(&self) -> Option<Uuid> {
        match self {
            Self::Event(event) => Some(event.id),
            Self::Schedule(_) => None,
        }
    }
}

/// Result of a trigger attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// A new run was created with its jobs queued
    Triggered { run_id: Uuid },

    /// A run for the same idempotency key exists
    AlreadyTriggered { run_id: Uuid },

    /// The enrollment policy rejected the contact
    NotEligible,
}

impl TriggerOutcome {
    /// The run created by this call, if any
    pub fn created_run(&self) -> Option<Uuid> {
        match self {
            Self::Triggered { run_id } => Some(*run_id),
            _ => None,
        }
    }
}

/// Creates runs and queues their jobs
#[derive(Clone)]
pub struct RunManager {
    store: Arc<dyn AutomationStore>,
    enrollment: EnrollmentGuard,
}

impl RunManager {
    pub fn new(store: Arc<dyn AutomationStore>) -> Self {
        Self {
            enrollment: EnrollmentGuard::new(store.clone()),
            store,
        }
    }

    /// Trigger a workflow
    ///
    /// 1. An existing run with the same idempotency key short-circuits.
    /// 2. The contact is enrolled if the policy permits, else `NotEligible`.
    /// 3. The run and one queued job per step, due at `now`, are inserted
    ///    together; losing the uniqueness race is `AlreadyTriggered`.
    ///
    /// Processing is left to the caller.
    #[instrument(skip(self, workflow, source), fields(workflow_id = %workflow.id))]
    pub async fn trigger(
        &self,
        workflow: &WorkflowDefinition,
        source: TriggerSource<'_>,
        now: DateTime<Utc>,
    ) -> Result<TriggerOutcome, EngineError> {
        let key = source.idempotency_key(workflow.id);

        if let Some(existing) = self.store.find_run_by_idempotency_key(&key).await? {
            debug!(run_id = %existing.id, %key, "run already exists");
            return Ok(TriggerOutcome::AlreadyTriggered {
                run_id: existing.id,
            });
        }

        let business_id = match source {
            TriggerSource::Event(event) => Some(event.business_id.clone()),
            TriggerSource::Schedule(_) => workflow.business_id.clone(),
        };

        let eligible = self
            .enrollment
            .try_enroll(business_id.as_deref(), source.contact_id(), workflow.id, now)
            .await?;
        if !eligible {
            return Ok(TriggerOutcome::NotEligible);
        }

        let run = WorkflowRun {
            id: Uuid::now_v7(),
            workflow_id: workflow.id,
            business_id: business_id.clone(),
            event_id: source.event_id(),
            contact_id: source.contact_id(),
            status: RunStatus::Running,
            context: run_context(workflow, business_id.as_deref(), &source),
            idempotency_key: key,
            created_at: now,
            completed_at: None,
            result: None,
        };

        let jobs: Vec<_> = workflow
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                WorkflowJob::queued(
                    run.id,
                    index as i32,
                    step.action_type.clone(),
                    step.config.clone(),
                    now,
                )
            })
            .collect();

        if let InsertOutcome::Existing(run_id) = self.store.insert_run(&run, &jobs).await? {
            debug!(%run_id, "lost idempotency race");
            return Ok(TriggerOutcome::AlreadyTriggered { run_id });
        }

        info!(run_id = %run.id, jobs = jobs.len(), workflow = %workflow.name, "workflow triggered");
        Ok(TriggerOutcome::Triggered { run_id: run.id })
    }
}

/// Data visible to step templates
fn run_context(
    workflow: &WorkflowDefinition,
    business_id: Option<&str>,
    source: &TriggerSource<'_>,
) -> serde_json::Value {
    let mut context = json!({
        "business_id": business_id,
        "workflow": { "id": workflow.id, "name": workflow.name },
    });

    match source {
        TriggerSource::Event(event) => {
            context["event"] = json!({
                "id": event.id,
                "intent": event.intent,
                "payload": event.payload,
                "source": event.source,
                "occurred_at": event.occurred_at,
            });
            context["contact_id"] = json!(event.contact_id);
        }
        TriggerSource::Schedule(at) => {
            context["schedule"] = json!({ "at": at });
        }
    }

    context
}
