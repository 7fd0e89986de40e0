//! # Workflow Automation Engine
//!
//! Turns business events into workflow runs and executes their steps as
//! queued jobs, coordinating concurrent callers through the store alone.
//!
//! ## Features
//!
//! - **Deduplicated ingestion**: events are unique per `(business_id, dedupe_key)`,
//!   with an optional same-intent window per business
//! - **Intent routing**: business workflows plus industry recipes, honoring
//!   recipe and pack toggles
//! - **Enrollment guard**: `always`, `once` or cooldown policies per contact
//! - **Idempotent runs**: at most one run per trigger and workflow
//! - **Job queue**: ordered steps, claim-before-execute, linear or exponential backoff
//! - **Scheduler**: `@hourly`, `@daily`, `@weekly` and `*/N` workflows, plus a
//!   sweep that resumes delayed, retried and stuck jobs
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     AutomationEngine                         │
//! │  submit_event -> EventIngestor -> IntentRouter -> RunManager │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              JobProcessor          Scheduler                 │
//! │  (claims jobs, runs actions)  (cron triggers, queue sweep)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     AutomationStore                          │
//! │  (PostgreSQL or in-memory: events, runs, jobs, CRM records)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use flowline_engine::prelude::*;
//!
//! let store = Arc::new(InMemoryAutomationStore::new());
//! let engine = AutomationEngine::with_default_actions(
//!     store,
//!     Arc::new(RecordingEmailTransport::new()),
//!     &EngineConfig::default(),
//! )?;
//!
//! engine
//!     .save_workflow(
//!         &WorkflowDefinition::new("Welcome", WorkflowTrigger::event(["contact.submit"]))
//!             .for_business("b1")
//!             .with_step(Step::new("send_email", json!({
//!                 "to": "{{event.payload.email}}",
//!                 "subject": "Thanks!",
//!                 "body": "We will be in touch."
//!             }))),
//!     )
//!     .await?;
//!
//! let outcome = engine
//!     .submit_event(NewEvent::new("b1", "contact.submit").with_dedupe_key("form-42"))
//!     .await?;
//! ```

pub mod actions;
pub mod config;
pub mod engine;
pub mod enrollment;
pub mod error;
pub mod ingest;
pub mod model;
pub mod persistence;
pub mod processor;
pub mod reliability;
pub mod routing;
pub mod runs;
pub mod scheduler;

/// Prelude for common imports
pub mod prelude {
    pub use crate::actions::{
        ActionContext, ActionError, ActionHandler, ActionKind, ActionOutcome, ActionRegistry,
        EmailTransport, HttpEmailTransport, RecordingEmailTransport,
    };
    pub use crate::config::{DispatchMode, EngineConfig};
    pub use crate::engine::{AutomationEngine, SubmitOutcome, TriggeredWorkflow};
    pub use crate::error::EngineError;
    pub use crate::model::{
        AutomationSettings, EnrollmentPolicy, Event, JobStatus, NewEvent, RunStatus, Step,
        WorkflowDefinition, WorkflowJob, WorkflowRun, WorkflowTrigger,
    };
    pub use crate::persistence::{
        AutomationStore, InMemoryAutomationStore, PostgresAutomationStore, StoreError,
    };
    pub use crate::reliability::{BackoffStrategy, RetryPolicy};
    pub use crate::scheduler::{CronSchedule, TickReport};
}

// Re-export key types at crate root
pub use actions::{ActionError, ActionHandler, ActionKind, ActionOutcome, ActionRegistry};
pub use config::{DispatchMode, EngineConfig};
pub use engine::{AutomationEngine, SubmitOutcome, TriggeredWorkflow};
pub use error::EngineError;
pub use ingest::{DuplicateReason, EventIngestor, IngestOutcome};
pub use persistence::{
    AutomationStore, InMemoryAutomationStore, PostgresAutomationStore, StoreError,
};
pub use processor::{JobProcessor, ProcessResult};
pub use reliability::{BackoffStrategy, RetryPolicy};
pub use routing::IntentRouter;
pub use runs::{RunManager, TriggerOutcome, TriggerSource};
pub use scheduler::{CronSchedule, Scheduler, TickReport};
