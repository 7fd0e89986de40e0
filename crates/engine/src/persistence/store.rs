//! AutomationStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{
    AutomationSettings, Business, Collection, Enrollment, EnrollmentCondition, Event, Recipe,
    Record, RunStatus, WorkflowDefinition, WorkflowJob, WorkflowRun,
};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Run not found
    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    /// Job not found
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Record not found in a collection
    #[error("{collection} record not found: {id}")]
    RecordNotFound { collection: Collection, id: Uuid },

    /// Write rejected by a uniqueness or reference check
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result of an insert guarded by a uniqueness constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Row written
    Inserted,

    /// A row with the same unique key exists; nothing was written
    Existing(Uuid),
}

/// Store for automation state
///
/// The store is the only shared mutable resource of the engine. Every
/// coordination point is a single-row conditional write:
/// - events are unique by `(business_id, dedupe_key)`
/// - runs are unique by `idempotency_key`
/// - jobs are claimed with `Queued -> Processing` conditioned on status
/// - `last_run_at` is updated by compare-and-set
/// - enrollments are written conditionally
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait AutomationStore: Send + Sync + 'static {
    // =========================================================================
    // Business Configuration
    // =========================================================================

    /// Get a business profile
    async fn get_business(&self, business_id: &str) -> Result<Option<Business>, StoreError>;

    /// Get automation settings (None when the business has no row)
    async fn get_settings(&self, business_id: &str)
        -> Result<Option<AutomationSettings>, StoreError>;

    /// Create or replace automation settings
    async fn save_settings(&self, settings: &AutomationSettings) -> Result<(), StoreError>;

    // =========================================================================
    // Event Operations
    // =========================================================================

    /// Insert an event unless `(business_id, dedupe_key)` exists
    async fn insert_event(&self, event: &Event) -> Result<InsertOutcome, StoreError>;

    /// Get an event by id
    async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError>;

    /// Most recent event of a business with `intent` that occurred at or after `since`
    async fn find_recent_event(
        &self,
        business_id: &str,
        intent: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Event>, StoreError>;

    /// Set the processed flag
    async fn mark_event_processed(&self, event_id: Uuid) -> Result<(), StoreError>;

    /// Events never marked processed that occurred before `occurred_before`, oldest first
    async fn list_unprocessed_events(
        &self,
        occurred_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError>;

    // =========================================================================
    // Workflow Definitions
    // =========================================================================

    /// Create or replace a workflow definition
    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), StoreError>;

    /// Get a workflow definition
    async fn get_workflow(&self, workflow_id: Uuid)
        -> Result<Option<WorkflowDefinition>, StoreError>;

    /// Active event-triggered workflows owned by a business
    async fn list_event_workflows(
        &self,
        business_id: &str,
    ) -> Result<Vec<WorkflowDefinition>, StoreError>;

    /// Active schedule-triggered workflows of every business
    async fn list_schedule_workflows(&self) -> Result<Vec<WorkflowDefinition>, StoreError>;

    /// Set `last_run_at` to `next` only if it currently equals `expected`
    ///
    /// Returns whether this call won the update.
    async fn compare_and_set_last_run(
        &self,
        workflow_id: Uuid,
        expected: Option<DateTime<Utc>>,
        next: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    // =========================================================================
    // Recipes
    // =========================================================================

    /// Recipe ids mapped to `(intent, industry)`
    async fn list_recipe_ids(&self, intent: &str, industry: &str)
        -> Result<Vec<String>, StoreError>;

    /// Get a recipe
    async fn get_recipe(&self, recipe_id: &str) -> Result<Option<Recipe>, StoreError>;

    /// Concrete workflow implementing a recipe for an industry
    async fn find_recipe_workflow(
        &self,
        recipe_id: &str,
        industry: &str,
    ) -> Result<Option<WorkflowDefinition>, StoreError>;

    /// Explicit per-business recipe toggle
    async fn get_recipe_toggle(
        &self,
        business_id: &str,
        recipe_id: &str,
    ) -> Result<Option<bool>, StoreError>;

    /// Explicit per-business pack toggle
    async fn get_pack_toggle(
        &self,
        business_id: &str,
        pack_id: &str,
    ) -> Result<Option<bool>, StoreError>;

    // =========================================================================
    // Enrollments
    // =========================================================================

    /// Get the enrollment of a contact in a workflow
    async fn get_enrollment(
        &self,
        contact_id: Uuid,
        workflow_id: Uuid,
    ) -> Result<Option<Enrollment>, StoreError>;

    /// Record an enrollment at `at` if `condition` permits the current one
    ///
    /// Returns whether the enrollment was written.
    async fn try_enroll(
        &self,
        contact_id: Uuid,
        workflow_id: Uuid,
        at: DateTime<Utc>,
        condition: EnrollmentCondition,
    ) -> Result<bool, StoreError>;

    // =========================================================================
    // Run Operations
    // =========================================================================

    /// Insert a run and its jobs unless the run's idempotency key exists
    ///
    /// All-or-nothing: a failure writes neither the run nor any job, and an
    /// existing key writes nothing.
    async fn insert_run(
        &self,
        run: &WorkflowRun,
        jobs: &[WorkflowJob],
    ) -> Result<InsertOutcome, StoreError>;

    /// Get a run
    async fn get_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>, StoreError>;

    /// Find a run by idempotency key
    async fn find_run_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<WorkflowRun>, StoreError>;

    /// Move a run to a terminal status
    async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        result: serde_json::Value,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // =========================================================================
    // Job Queue Operations
    // =========================================================================

    /// Insert jobs in bulk
    async fn insert_jobs(&self, jobs: &[WorkflowJob]) -> Result<(), StoreError>;

    /// Jobs of a run ordered by step index
    async fn list_jobs(&self, run_id: Uuid) -> Result<Vec<WorkflowJob>, StoreError>;

    /// Claim a job: `Queued -> Processing` if queued and due at `now`
    ///
    /// Returns whether this call won the claim.
    async fn claim_job(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Mark a job completed
    async fn complete_job(
        &self,
        job_id: Uuid,
        result: serde_json::Value,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Put a job back in the queue
    async fn requeue_job(
        &self,
        job_id: Uuid,
        retry_count: u32,
        scheduled_at: DateTime<Utc>,
        error_message: Option<&str>,
        result: Option<serde_json::Value>,
    ) -> Result<(), StoreError>;

    /// Mark a job failed permanently
    async fn fail_job(
        &self,
        job_id: Uuid,
        retry_count: u32,
        error_message: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Next job of each run, when it is queued and due at `now`, oldest first
    ///
    /// The next job is the lowest step index still queued or processing, so
    /// a run waiting on a future step never occupies a slot.
    async fn list_runnable_jobs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowJob>, StoreError>;

    /// Return `Processing` jobs claimed before `claimed_before` to the queue
    async fn reclaim_stale_jobs(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError>;

    // =========================================================================
    // CRM Records
    // =========================================================================

    /// Insert a record and return its id
    async fn insert_record(
        &self,
        collection: Collection,
        business_id: Option<&str>,
        data: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError>;

    /// Shallow-merge `patch` into a record's data
    async fn update_record(
        &self,
        collection: Collection,
        id: Uuid,
        patch: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<Record, StoreError>;

    /// Get a record
    async fn get_record(&self, collection: Collection, id: Uuid)
        -> Result<Option<Record>, StoreError>;
}

/// Merge the top-level keys of `patch` into `target`
///
/// Non-object targets are replaced by the patch.
pub fn merge_json(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target.as_object_mut(), patch) {
        (Some(map), serde_json::Value::Object(patch)) => {
            for (k, v) in patch {
                map.insert(k, v);
            }
        }
        (_, patch) => *target = patch,
    }
}
