//! Workflow runs and their jobs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run created but not started
    Pending,

    /// Run has jobs that are not terminal
    Running,

    /// All jobs terminal, none failed
    Completed,

    /// At least one job failed
    Failed,
}

impl RunStatus {
    /// Aggregate status of a run from its job statuses
    ///
    /// `Failed` if any job failed, else `Completed` if every job is terminal,
    /// else `Running`. A run without jobs is `Completed`.
    pub fn derive<'a>(jobs: impl IntoIterator<Item = &'a JobStatus>) -> Self {
        let mut all_terminal = true;
        for status in jobs {
            match status {
                JobStatus::Failed => return Self::Failed,
                JobStatus::Completed => {}
                JobStatus::Queued | JobStatus::Processing => all_terminal = false,
            }
        }
        if all_terminal {
            Self::Completed
        } else {
            Self::Running
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Job status in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One execution of a workflow for one trigger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub business_id: Option<String>,
    pub event_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub status: RunStatus,
    /// Data available to step configs (`{{event.payload.email}}` etc.)
    pub context: serde_json::Value,
    /// At most one run per key
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
}

/// One step of a run, queued for the processor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct WorkflowJob {
    pub id: Uuid,
    pub workflow_run_id: Uuid,
    pub step_index: i32,
    pub action_type: String,
    pub action_config: serde_json::Value,
    pub status: JobStatus,
    pub retry_count: u32,
    /// Not runnable before this instant
    pub scheduled_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl WorkflowJob {
    /// A fresh queued job for a step
    pub fn queued(
        run_id: Uuid,
        step_index: i32,
        action_type: impl Into<String>,
        action_config: serde_json::Value,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_run_id: run_id,
            step_index,
            action_type: action_type.into(),
            action_config,
            status: JobStatus::Queued,
            retry_count: 0,
            scheduled_at,
            claimed_at: None,
            processed_at: None,
            error_message: None,
            result: None,
        }
    }

    /// Whether this job completed without doing its work
    pub fn is_skipped(&self) -> bool {
        self.result
            .as_ref()
            .and_then(|r| r.get("skipped"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}
