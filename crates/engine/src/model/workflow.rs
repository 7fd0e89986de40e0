//! Workflow definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Intent wildcard accepted in event triggers
pub const ANY_INTENT: &str = "*";

/// How a workflow is started
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowTrigger {
    /// Started by routed business events
    Event {
        /// Intents this workflow reacts to (`*` matches any)
        #[serde(default)]
        intents: Vec<String>,
    },

    /// Started by the scheduler
    Schedule {
        /// `@hourly`, `@daily`, `@weekly` or `*/N` (minutes)
        cron: String,
    },

    /// Started by an inbound webhook (routed outside the engine)
    Webhook {
        #[serde(default)]
        path: Option<String>,
    },
}

impl WorkflowTrigger {
    pub fn event(intents: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Event {
            intents: intents.into_iter().map(Into::into).collect(),
        }
    }

    pub fn schedule(cron: impl Into<String>) -> Self {
        Self::Schedule { cron: cron.into() }
    }

    /// Short tag as stored in the `trigger_type` column
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Event { .. } => "event",
            Self::Schedule { .. } => "schedule",
            Self::Webhook { .. } => "webhook",
        }
    }

    /// Whether an event trigger reacts to `intent`
    pub fn matches_intent(&self, intent: &str) -> bool {
        match self {
            Self::Event { intents } => intents.iter().any(|i| i == intent || i == ANY_INTENT),
            _ => false,
        }
    }
}

/// One step of a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Step {
    /// Action tag, e.g. `send_email`
    pub action_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl Step {
    pub fn new(action_type: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            action_type: action_type.into(),
            config,
        }
    }
}

/// A workflow definition
///
/// Business workflows carry `business_id`; recipe workflows carry
/// `recipe_id` and `industry` and are shared across businesses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct WorkflowDefinition {
    pub id: Uuid,
    #[serde(default)]
    pub business_id: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    pub name: String,
    pub trigger: WorkflowTrigger,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Lower runs first
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub recipe_id: Option<String>,
    /// Last scheduler trigger, updated by compare-and-set
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, trigger: WorkflowTrigger) -> Self {
        Self {
            id: Uuid::now_v7(),
            business_id: None,
            industry: None,
            name: name.into(),
            trigger,
            steps: vec![],
            is_active: true,
            priority: 0,
            recipe_id: None,
            last_run_at: None,
        }
    }

    pub fn for_business(mut self, business_id: impl Into<String>) -> Self {
        self.business_id = Some(business_id.into());
        self
    }

    pub fn for_recipe(mut self, recipe_id: impl Into<String>, industry: impl Into<String>) -> Self {
        self.recipe_id = Some(recipe_id.into());
        self.industry = Some(industry.into());
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn is_schedule(&self) -> bool {
        matches!(self.trigger, WorkflowTrigger::Schedule { .. })
    }
}
