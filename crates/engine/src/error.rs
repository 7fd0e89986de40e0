//! Engine error type

use crate::actions::ActionError;
use crate::persistence::StoreError;
use crate::scheduler::CronError;

/// Errors surfaced by engine components
///
/// Duplicate events, idempotency hits and ineligible contacts are outcomes,
/// not errors; see [`IngestOutcome`](crate::ingest::IngestOutcome) and
/// [`TriggerOutcome`](crate::runs::TriggerOutcome).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A referenced entity does not exist
    #[error("{what} not found: {id}")]
    LookupFailure { what: &'static str, id: String },

    /// Caller input rejected before touching the store
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(#[from] CronError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// An action handler could not be built
    #[error("action setup failed: {0}")]
    Action(#[from] ActionError),
}

impl EngineError {
    pub fn lookup(what: &'static str, id: impl ToString) -> Self {
        Self::LookupFailure {
            what,
            id: id.to_string(),
        }
    }

    /// Whether the error refers to a missing entity
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::LookupFailure { .. }
                | Self::Store(
                    StoreError::RunNotFound(_)
                        | StoreError::JobNotFound(_)
                        | StoreError::WorkflowNotFound(_)
                        | StoreError::RecordNotFound { .. }
                )
        )
    }
}
