//! Step actions
//!
//! Every step names an [`ActionKind`]. The processor looks the kind up in an
//! [`ActionRegistry`] and runs the registered [`ActionHandler`] against the
//! step's rendered config.
//!
//! Handlers return an [`ActionOutcome`]:
//! - `Completed` stores the result and moves on
//! - `Reschedule` puts the job back in the queue until a later instant
//! - `Halt` completes the job and skips the rest of the run
//!
//! Errors are [`ActionError`]s; retryable ones go through the retry policy,
//! non-retryable ones fail the job at once.

mod condition;
mod crm;
mod delay;
mod email;
mod template;
mod webhook;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::model::{WorkflowJob, WorkflowRun};
use crate::persistence::{AutomationStore, StoreError};

pub use condition::{ConditionAction, ConditionOperator};
pub use crm::{
    CreateActivityAction, CreateContactAction, CreateLeadAction, UpdateContactAction,
    UpdateLeadStatusAction,
};
pub use delay::DelayAction;
pub use email::{
    EmailMessage, EmailTransport, HttpEmailTransport, RecordingEmailTransport, SendEmailAction,
};
pub use template::{lookup_path, render};
pub use webhook::WebhookAction;

/// Closed set of step actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    CreateContact,
    UpdateContact,
    CreateLead,
    UpdateLeadStatus,
    CreateActivity,
    SendEmail,
    Webhook,
    Delay,
    EvaluateCondition,
}

impl ActionKind {
    pub const ALL: [ActionKind; 9] = [
        Self::CreateContact,
        Self::UpdateContact,
        Self::CreateLead,
        Self::UpdateLeadStatus,
        Self::CreateActivity,
        Self::SendEmail,
        Self::Webhook,
        Self::Delay,
        Self::EvaluateCondition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateContact => "create_contact",
            Self::UpdateContact => "update_contact",
            Self::CreateLead => "create_lead",
            Self::UpdateLeadStatus => "update_lead_status",
            Self::CreateActivity => "create_activity",
            Self::SendEmail => "send_email",
            Self::Webhook => "webhook",
            Self::Delay => "delay",
            Self::EvaluateCondition => "evaluate_condition",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Dashed aliases are accepted for definitions written by hand
        let normalized = s.trim().replace('-', "_");
        match normalized.as_str() {
            "call_webhook" => Ok(Self::Webhook),
            other => Self::ALL
                .into_iter()
                .find(|kind| kind.as_str() == other)
                .ok_or_else(|| format!("unknown action type: {s}")),
        }
    }
}

/// Error returned by an action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionError {
    pub message: String,

    /// Whether the processor may retry the job
    pub retryable: bool,

    /// Additional error details (status codes, response bodies)
    pub details: Option<Value>,
}

impl ActionError {
    /// Create a new retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            details: None,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            details: None,
        }
    }

    /// Config rejected before doing any work
    pub fn invalid_config(message: impl fmt::Display) -> Self {
        Self::non_retryable(format!("invalid config: {message}"))
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActionError {}

impl From<StoreError> for ActionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(_) => Self::retryable(err.to_string()),
            _ => Self::non_retryable(err.to_string()),
        }
    }
}

/// What the processor does with a job after its action returned
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Job completed with this result
    Completed(Value),

    /// Requeue the job without counting a retry
    Reschedule { until: DateTime<Utc>, result: Value },

    /// Job completed; skip every remaining step of the run
    Halt(Value),
}

/// Everything an action may read while executing one job
pub struct ActionContext<'a> {
    pub store: &'a dyn AutomationStore,
    pub run: &'a WorkflowRun,
    pub job: &'a WorkflowJob,
    /// Run context plus prior step results under `steps`
    pub scope: &'a Value,
    pub now: DateTime<Utc>,
}

/// Implementation of one action kind
#[async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    fn kind(&self) -> ActionKind;

    /// Execute the action against a rendered config
    ///
    /// Return `ActionError::retryable()` for transient failures and
    /// `ActionError::non_retryable()` for permanent ones.
    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        config: &Value,
    ) -> Result<ActionOutcome, ActionError>;
}

/// Deserialize a typed config, rejecting it as non-retryable on mismatch
pub fn parse_config<T: DeserializeOwned>(config: &Value) -> Result<T, ActionError> {
    let config = if config.is_null() {
        Value::Object(Default::default())
    } else {
        config.clone()
    };
    serde_json::from_value(config).map_err(ActionError::invalid_config)
}

/// Handlers by action kind
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in action
    pub fn with_defaults(
        email: Arc<dyn EmailTransport>,
        webhook_timeout: Duration,
    ) -> Result<Self, ActionError> {
        let mut registry = Self::new();
        registry.register(CreateContactAction);
        registry.register(UpdateContactAction);
        registry.register(CreateLeadAction);
        registry.register(UpdateLeadStatusAction);
        registry.register(CreateActivityAction);
        registry.register(SendEmailAction::new(email));
        registry.register(WebhookAction::new(webhook_timeout)?);
        registry.register(DelayAction);
        registry.register(ConditionAction);
        Ok(registry)
    }

    /// Register a handler, replacing any handler of the same kind
    pub fn register(&mut self, handler: impl ActionHandler) -> &mut Self {
        self.handlers.insert(handler.kind(), Arc::new(handler));
        self
    }

    /// Register a shared handler
    pub fn register_arc(&mut self, handler: Arc<dyn ActionHandler>) -> &mut Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().map(ActionKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("ActionRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::model::RunStatus;
    use serde_json::json;
    use uuid::Uuid;

    pub fn run(context: Value) -> WorkflowRun {
        WorkflowRun {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            business_id: Some("b1".into()),
            event_id: None,
            contact_id: None,
            status: RunStatus::Running,
            context,
            idempotency_key: Uuid::now_v7().to_string(),
            created_at: Utc::now(),
            completed_at: None,
            result: None,
        }
    }

    pub fn job(run: &WorkflowRun, kind: ActionKind) -> WorkflowJob {
        WorkflowJob::queued(run.id, 0, kind.as_str(), json!({}), Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!("send_email".parse::<ActionKind>(), Ok(ActionKind::SendEmail));
        assert_eq!("send-email".parse::<ActionKind>(), Ok(ActionKind::SendEmail));
        assert_eq!("call-webhook".parse::<ActionKind>(), Ok(ActionKind::Webhook));
        assert!("launch_rocket".parse::<ActionKind>().is_err());

        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_default_registry_covers_all_kinds() {
        let registry = ActionRegistry::with_defaults(
            Arc::new(RecordingEmailTransport::new()),
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(registry.len(), ActionKind::ALL.len());
        for kind in ActionKind::ALL {
            assert!(registry.contains(kind), "missing {kind}");
        }
    }

    #[test]
    fn test_store_error_retryability() {
        let err = ActionError::from(StoreError::Database("connection reset".into()));
        assert!(err.retryable);

        let err = ActionError::from(StoreError::RunNotFound(uuid::Uuid::now_v7()));
        assert!(!err.retryable);
    }

    #[test]
    fn test_parse_config_rejects_missing_fields() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Config {
            url: String,
        }

        let err = parse_config::<Config>(&serde_json::json!({})).unwrap_err();
        assert!(!err.retryable);
        assert!(err.message.starts_with("invalid config"));
    }
}
