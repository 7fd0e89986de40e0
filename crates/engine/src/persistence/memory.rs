//! In-memory implementation of AutomationStore

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::model::{
    AutomationSettings, Business, Collection, Enrollment, EnrollmentCondition, Event, JobStatus,
    Recipe, Record, RunStatus, WorkflowDefinition, WorkflowJob, WorkflowRun,
};

/// Events with their dedupe index
#[derive(Default)]
struct EventTable {
    rows: HashMap<Uuid, Event>,
    by_dedupe_key: HashMap<(String, String), Uuid>,
}

/// Runs with their idempotency index
#[derive(Default)]
struct RunTable {
    rows: HashMap<Uuid, WorkflowRun>,
    by_idempotency_key: HashMap<String, Uuid>,
}

/// Recipe catalog and per-business toggles
#[derive(Default)]
struct RecipeTables {
    recipes: HashMap<String, Recipe>,
    mappings: HashMap<(String, String), Vec<String>>,
    recipe_toggles: HashMap<(String, String), bool>,
    pack_toggles: HashMap<(String, String), bool>,
}

/// In-memory implementation of AutomationStore
///
/// Each table sits behind its own lock, and every conditional write checks
/// and mutates under a single write guard, which gives the same uniqueness
/// and claim semantics as the PostgreSQL implementation.
///
/// # Example
///
/// ```
/// use flowline_engine::InMemoryAutomationStore;
///
/// let store = InMemoryAutomationStore::new();
/// assert_eq!(store.run_count(), 0);
/// ```
pub struct InMemoryAutomationStore {
    businesses: RwLock<HashMap<String, Business>>,
    settings: RwLock<HashMap<String, AutomationSettings>>,
    events: RwLock<EventTable>,
    workflows: RwLock<HashMap<Uuid, WorkflowDefinition>>,
    recipes: RwLock<RecipeTables>,
    enrollments: RwLock<HashMap<(Uuid, Uuid), Enrollment>>,
    runs: RwLock<RunTable>,
    jobs: RwLock<HashMap<Uuid, WorkflowJob>>,
    records: RwLock<HashMap<Uuid, Record>>,
}

impl InMemoryAutomationStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            businesses: RwLock::new(HashMap::new()),
            settings: RwLock::new(HashMap::new()),
            events: RwLock::new(EventTable::default()),
            workflows: RwLock::new(HashMap::new()),
            recipes: RwLock::new(RecipeTables::default()),
            enrollments: RwLock::new(HashMap::new()),
            runs: RwLock::new(RunTable::default()),
            jobs: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Register a business profile
    pub fn put_business(&self, business: Business) {
        self.businesses.write().insert(business.id.clone(), business);
    }

    /// Register a recipe
    pub fn put_recipe(&self, recipe: Recipe) {
        self.recipes.write().recipes.insert(recipe.id.clone(), recipe);
    }

    /// Map a recipe to `(intent, industry)`
    pub fn map_recipe(&self, intent: &str, industry: &str, recipe_id: &str) {
        self.recipes
            .write()
            .mappings
            .entry((intent.to_string(), industry.to_string()))
            .or_default()
            .push(recipe_id.to_string());
    }

    /// Set an explicit recipe toggle for a business
    pub fn set_recipe_toggle(&self, business_id: &str, recipe_id: &str, enabled: bool) {
        self.recipes
            .write()
            .recipe_toggles
            .insert((business_id.to_string(), recipe_id.to_string()), enabled);
    }

    /// Set an explicit pack toggle for a business
    pub fn set_pack_toggle(&self, business_id: &str, pack_id: &str, enabled: bool) {
        self.recipes
            .write()
            .pack_toggles
            .insert((business_id.to_string(), pack_id.to_string()), enabled);
    }

    /// Get the number of events
    pub fn event_count(&self) -> usize {
        self.events.read().rows.len()
    }

    /// Get the number of runs
    pub fn run_count(&self) -> usize {
        self.runs.read().rows.len()
    }

    /// Get the number of jobs in `status`
    pub fn job_count(&self, status: JobStatus) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|j| j.status == status)
            .count()
    }

    /// Records of a collection
    pub fn records(&self, collection: Collection) -> Vec<Record> {
        let mut records: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|r| r.collection == collection)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }
}

impl Default for InMemoryAutomationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AutomationStore for InMemoryAutomationStore {
    async fn get_business(&self, business_id: &str) -> Result<Option<Business>, StoreError> {
        Ok(self.businesses.read().get(business_id).cloned())
    }

    async fn get_settings(
        &self,
        business_id: &str,
    ) -> Result<Option<AutomationSettings>, StoreError> {
        Ok(self.settings.read().get(business_id).cloned())
    }

    async fn save_settings(&self, settings: &AutomationSettings) -> Result<(), StoreError> {
        self.settings
            .write()
            .insert(settings.business_id.clone(), settings.clone());
        Ok(())
    }

    async fn insert_event(&self, event: &Event) -> Result<InsertOutcome, StoreError> {
        let mut events = self.events.write();
        let key = (event.business_id.clone(), event.dedupe_key.clone());
        if let Some(existing) = events.by_dedupe_key.get(&key) {
            return Ok(InsertOutcome::Existing(*existing));
        }

        events.by_dedupe_key.insert(key, event.id);
        events.rows.insert(event.id, event.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.events.read().rows.get(&event_id).cloned())
    }

    async fn find_recent_event(
        &self,
        business_id: &str,
        intent: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Event>, StoreError> {
        Ok(self
            .events
            .read()
            .rows
            .values()
            .filter(|e| e.business_id == business_id && e.intent == intent)
            .filter(|e| e.occurred_at >= since)
            .max_by_key(|e| e.occurred_at)
            .cloned())
    }

    async fn mark_event_processed(&self, event_id: Uuid) -> Result<(), StoreError> {
        if let Some(event) = self.events.write().rows.get_mut(&event_id) {
            event.processed = true;
        }
        Ok(())
    }

    async fn list_unprocessed_events(
        &self,
        occurred_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError> {
        let mut events: Vec<_> = self
            .events
            .read()
            .rows
            .values()
            .filter(|e| !e.processed && e.occurred_at < occurred_before)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.occurred_at);
        events.truncate(limit);
        Ok(events)
    }

    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), StoreError> {
        self.workflows.write().insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<WorkflowDefinition>, StoreError> {
        Ok(self.workflows.read().get(&workflow_id).cloned())
    }

    async fn list_event_workflows(
        &self,
        business_id: &str,
    ) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let mut workflows: Vec<_> = self
            .workflows
            .read()
            .values()
            .filter(|w| w.is_active && w.trigger.kind() == "event")
            .filter(|w| w.business_id.as_deref() == Some(business_id))
            .cloned()
            .collect();
        workflows.sort_by_key(|w| w.id);
        Ok(workflows)
    }

    async fn list_schedule_workflows(&self) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let mut workflows: Vec<_> = self
            .workflows
            .read()
            .values()
            .filter(|w| w.is_active && w.is_schedule())
            .cloned()
            .collect();
        workflows.sort_by_key(|w| w.id);
        Ok(workflows)
    }

    async fn compare_and_set_last_run(
        &self,
        workflow_id: Uuid,
        expected: Option<DateTime<Utc>>,
        next: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .get_mut(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        if workflow.last_run_at != expected {
            return Ok(false);
        }
        workflow.last_run_at = Some(next);
        Ok(true)
    }

    async fn list_recipe_ids(
        &self,
        intent: &str,
        industry: &str,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .recipes
            .read()
            .mappings
            .get(&(intent.to_string(), industry.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_recipe(&self, recipe_id: &str) -> Result<Option<Recipe>, StoreError> {
        Ok(self.recipes.read().recipes.get(recipe_id).cloned())
    }

    async fn find_recipe_workflow(
        &self,
        recipe_id: &str,
        industry: &str,
    ) -> Result<Option<WorkflowDefinition>, StoreError> {
        Ok(self
            .workflows
            .read()
            .values()
            .find(|w| {
                w.recipe_id.as_deref() == Some(recipe_id) && w.industry.as_deref() == Some(industry)
            })
            .cloned())
    }

    async fn get_recipe_toggle(
        &self,
        business_id: &str,
        recipe_id: &str,
    ) -> Result<Option<bool>, StoreError> {
        Ok(self
            .recipes
            .read()
            .recipe_toggles
            .get(&(business_id.to_string(), recipe_id.to_string()))
            .copied())
    }

    async fn get_pack_toggle(
        &self,
        business_id: &str,
        pack_id: &str,
    ) -> Result<Option<bool>, StoreError> {
        Ok(self
            .recipes
            .read()
            .pack_toggles
            .get(&(business_id.to_string(), pack_id.to_string()))
            .copied())
    }

    async fn get_enrollment(
        &self,
        contact_id: Uuid,
        workflow_id: Uuid,
    ) -> Result<Option<Enrollment>, StoreError> {
        Ok(self
            .enrollments
            .read()
            .get(&(contact_id, workflow_id))
            .cloned())
    }

    async fn try_enroll(
        &self,
        contact_id: Uuid,
        workflow_id: Uuid,
        at: DateTime<Utc>,
        condition: EnrollmentCondition,
    ) -> Result<bool, StoreError> {
        let mut enrollments = self.enrollments.write();
        let key = (contact_id, workflow_id);
        if !condition.permits(enrollments.get(&key)) {
            return Ok(false);
        }

        enrollments.insert(
            key,
            Enrollment {
                contact_id,
                workflow_id,
                enrolled_at: at,
            },
        );
        Ok(true)
    }

    async fn insert_run(
        &self,
        run: &WorkflowRun,
        jobs: &[WorkflowJob],
    ) -> Result<InsertOutcome, StoreError> {
        let mut runs = self.runs.write();
        if let Some(existing) = runs.by_idempotency_key.get(&run.idempotency_key) {
            return Ok(InsertOutcome::Existing(*existing));
        }

        let mut table = self.jobs.write();
        if let Some(job) = jobs.iter().find(|j| j.workflow_run_id != run.id) {
            return Err(StoreError::Constraint(format!(
                "job {} belongs to run {}, not {}",
                job.id, job.workflow_run_id, run.id
            )));
        }
        validate_jobs(&table, jobs)?;

        runs.by_idempotency_key
            .insert(run.idempotency_key.clone(), run.id);
        runs.rows.insert(run.id, run.clone());
        for job in jobs {
            table.insert(job.id, job.clone());
        }
        Ok(InsertOutcome::Inserted)
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>, StoreError> {
        Ok(self.runs.read().rows.get(&run_id).cloned())
    }

    async fn find_run_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<WorkflowRun>, StoreError> {
        let runs = self.runs.read();
        Ok(runs
            .by_idempotency_key
            .get(key)
            .and_then(|id| runs.rows.get(id))
            .cloned())
    }

    async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        result: serde_json::Value,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let run = runs
            .rows
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;

        run.status = status;
        run.result = Some(result);
        run.completed_at = Some(completed_at);
        Ok(())
    }

    async fn insert_jobs(&self, jobs: &[WorkflowJob]) -> Result<(), StoreError> {
        let mut table = self.jobs.write();
        validate_jobs(&table, jobs)?;
        for job in jobs {
            table.insert(job.id, job.clone());
        }
        Ok(())
    }

    async fn list_jobs(&self, run_id: Uuid) -> Result<Vec<WorkflowJob>, StoreError> {
        let mut jobs: Vec<_> = self
            .jobs
            .read()
            .values()
            .filter(|j| j.workflow_run_id == run_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.step_index);
        Ok(jobs)
    }

    async fn claim_job(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(false);
        };

        if job.status != JobStatus::Queued || job.scheduled_at > now {
            return Ok(false);
        }
        job.status = JobStatus::Processing;
        job.claimed_at = Some(now);
        Ok(true)
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        result: serde_json::Value,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;

        job.status = JobStatus::Completed;
        job.result = Some(result);
        job.processed_at = Some(processed_at);
        Ok(())
    }

    async fn requeue_job(
        &self,
        job_id: Uuid,
        retry_count: u32,
        scheduled_at: DateTime<Utc>,
        error_message: Option<&str>,
        result: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;

        job.status = JobStatus::Queued;
        job.retry_count = retry_count;
        job.scheduled_at = scheduled_at;
        job.claimed_at = None;
        if let Some(message) = error_message {
            job.error_message = Some(message.to_string());
        }
        if result.is_some() {
            job.result = result;
        }
        Ok(())
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        retry_count: u32,
        error_message: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;

        job.status = JobStatus::Failed;
        job.retry_count = retry_count;
        job.error_message = Some(error_message.to_string());
        job.processed_at = Some(processed_at);
        Ok(())
    }

    async fn list_runnable_jobs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowJob>, StoreError> {
        let table = self.jobs.read();
        let mut heads: HashMap<Uuid, &WorkflowJob> = HashMap::new();
        for job in table.values() {
            if !matches!(job.status, JobStatus::Queued | JobStatus::Processing) {
                continue;
            }
            heads
                .entry(job.workflow_run_id)
                .and_modify(|head| {
                    if job.step_index < head.step_index {
                        *head = job;
                    }
                })
                .or_insert(job);
        }

        let mut jobs: Vec<_> = heads
            .into_values()
            .filter(|j| j.status == JobStatus::Queued && j.scheduled_at <= now)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.scheduled_at, j.step_index));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn reclaim_stale_jobs(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut reclaimed = vec![];
        for job in self.jobs.write().values_mut() {
            let stale = job.status == JobStatus::Processing
                && job.claimed_at.map_or(true, |at| at < claimed_before);
            if stale {
                job.status = JobStatus::Queued;
                job.claimed_at = None;
                reclaimed.push(job.id);
            }
        }
        Ok(reclaimed)
    }

    async fn insert_record(
        &self,
        collection: Collection,
        business_id: Option<&str>,
        data: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::now_v7();
        self.records.write().insert(
            id,
            Record {
                id,
                collection,
                business_id: business_id.map(str::to_string),
                data,
                created_at: at,
                updated_at: at,
            },
        );
        Ok(id)
    }

    async fn update_record(
        &self,
        collection: Collection,
        id: Uuid,
        patch: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<Record, StoreError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(&id)
            .filter(|r| r.collection == collection)
            .ok_or(StoreError::RecordNotFound { collection, id })?;

        merge_json(&mut record.data, patch);
        record.updated_at = at;
        Ok(record.clone())
    }

    async fn get_record(
        &self,
        collection: Collection,
        id: Uuid,
    ) -> Result<Option<Record>, StoreError> {
        Ok(self
            .records
            .read()
            .get(&id)
            .filter(|r| r.collection == collection)
            .cloned())
    }
}

/// Checks the id and `(run, step)` uniqueness a job row must satisfy
fn validate_jobs(table: &HashMap<Uuid, WorkflowJob>, jobs: &[WorkflowJob]) -> Result<(), StoreError> {
    let mut ids = HashSet::new();
    let mut steps: HashSet<(Uuid, i32)> = table
        .values()
        .map(|j| (j.workflow_run_id, j.step_index))
        .collect();
    for job in jobs {
        if table.contains_key(&job.id) || !ids.insert(job.id) {
            return Err(StoreError::Constraint(format!("duplicate job id {}", job.id)));
        }
        if !steps.insert((job.workflow_run_id, job.step_index)) {
            return Err(StoreError::Constraint(format!(
                "duplicate step {} in run {}",
                job.step_index, job.workflow_run_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewEvent, WorkflowTrigger};
    use chrono::Duration;
    use serde_json::json;

    fn run(key: &str) -> WorkflowRun {
        WorkflowRun {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            business_id: Some("b1".into()),
            event_id: None,
            contact_id: None,
            status: RunStatus::Running,
            context: json!({}),
            idempotency_key: key.to_string(),
            created_at: Utc::now(),
            completed_at: None,
            result: None,
        }
    }

    #[tokio::test]
    async fn test_insert_event_dedupes_by_key() {
        let store = InMemoryAutomationStore::new();
        let now = Utc::now();

        let first = NewEvent::new("b1", "contact.submit")
            .with_dedupe_key("d1")
            .into_event(now);
        let second = NewEvent::new("b1", "contact.submit")
            .with_dedupe_key("d1")
            .into_event(now);
        let other_business = NewEvent::new("b2", "contact.submit")
            .with_dedupe_key("d1")
            .into_event(now);

        assert_eq!(store.insert_event(&first).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            store.insert_event(&second).await.unwrap(),
            InsertOutcome::Existing(first.id)
        );
        assert_eq!(
            store.insert_event(&other_business).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(store.event_count(), 2);
    }

    #[tokio::test]
    async fn test_insert_run_is_idempotent() {
        let store = InMemoryAutomationStore::new();
        let a = run("e1:w1");
        let b = run("e1:w1");

        let job = WorkflowJob::queued(b.id, 0, "delay", json!({}), Utc::now());
        assert_eq!(store.insert_run(&a, &[]).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            store.insert_run(&b, &[job]).await.unwrap(),
            InsertOutcome::Existing(a.id)
        );
        assert_eq!(store.run_count(), 1);
        assert_eq!(store.job_count(JobStatus::Queued), 0);
    }

    #[tokio::test]
    async fn test_insert_run_writes_nothing_when_a_job_is_rejected() {
        let store = InMemoryAutomationStore::new();
        let now = Utc::now();
        let existing = WorkflowJob::queued(Uuid::now_v7(), 0, "delay", json!({}), now);
        store.insert_jobs(&[existing.clone()]).await.unwrap();

        let run = run("e1:w1");
        let first = WorkflowJob::queued(run.id, 0, "send_email", json!({}), now);
        let mut clash = WorkflowJob::queued(run.id, 1, "webhook", json!({}), now);
        clash.id = existing.id;

        let result = store.insert_run(&run, &[first.clone(), clash]).await;
        assert!(matches!(result, Err(StoreError::Constraint(_))));
        assert!(store.get_run(run.id).await.unwrap().is_none());
        assert!(store.list_jobs(run.id).await.unwrap().is_empty());

        // The key stays free for a retry
        assert_eq!(
            store.insert_run(&run, &[first]).await.unwrap(),
            InsertOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn test_runnable_jobs_skip_runs_waiting_on_an_earlier_step() {
        let store = InMemoryAutomationStore::new();
        let now = Utc::now();

        // Run A is parked on a delay; its later steps are queued but not next
        let parked = Uuid::now_v7();
        let mut delay = WorkflowJob::queued(parked, 0, "delay", json!({}), now);
        delay.scheduled_at = now + Duration::days(1);
        let after_delay = WorkflowJob::queued(parked, 1, "send_email", json!({}), now);
        let last = WorkflowJob::queued(parked, 2, "webhook", json!({}), now);

        // Run B's first step is claimed by a worker, its second must wait
        let busy = Uuid::now_v7();
        let claimed = WorkflowJob::queued(busy, 0, "webhook", json!({}), now);
        let behind_claim = WorkflowJob::queued(busy, 1, "send_email", json!({}), now);

        let ready = Uuid::now_v7();
        let fresh = WorkflowJob::queued(ready, 0, "send_email", json!({}), now);

        store
            .insert_jobs(&[delay, after_delay, last, claimed.clone(), behind_claim, fresh.clone()])
            .await
            .unwrap();
        assert!(store.claim_job(claimed.id, now).await.unwrap());

        let runnable = store.list_runnable_jobs(now, 10).await.unwrap();
        let ids: Vec<_> = runnable.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![fresh.id]);

        let runnable = store
            .list_runnable_jobs(now + Duration::days(1), 1)
            .await
            .unwrap();
        assert_eq!(runnable.len(), 1);
    }

    #[tokio::test]
    async fn test_claim_job_once() {
        let store = InMemoryAutomationStore::new();
        let now = Utc::now();
        let job = WorkflowJob::queued(Uuid::now_v7(), 0, "delay", json!({}), now);
        store.insert_jobs(&[job.clone()]).await.unwrap();

        assert!(store.claim_job(job.id, now).await.unwrap());
        assert!(!store.claim_job(job.id, now).await.unwrap());
        assert_eq!(store.job_count(JobStatus::Processing), 1);
    }

    #[tokio::test]
    async fn test_claim_job_not_before_scheduled() {
        let store = InMemoryAutomationStore::new();
        let now = Utc::now();
        let job = WorkflowJob::queued(Uuid::now_v7(), 0, "delay", json!({}), now + Duration::minutes(1));
        store.insert_jobs(&[job.clone()]).await.unwrap();

        assert!(!store.claim_job(job.id, now).await.unwrap());
        assert!(store.claim_job(job.id, now + Duration::minutes(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_unknown_job_is_lost_claim() {
        let store = InMemoryAutomationStore::new();
        assert!(!store.claim_job(Uuid::now_v7(), Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_set_last_run() {
        let store = InMemoryAutomationStore::new();
        let workflow = WorkflowDefinition::new("Digest", WorkflowTrigger::schedule("@daily"));
        store.save_workflow(&workflow).await.unwrap();
        let now = Utc::now();

        assert!(store.compare_and_set_last_run(workflow.id, None, now).await.unwrap());
        // Second writer still expects None and loses
        assert!(!store.compare_and_set_last_run(workflow.id, None, now).await.unwrap());
        assert!(store
            .compare_and_set_last_run(workflow.id, Some(now), now + Duration::hours(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_reclaim_stale_jobs() {
        let store = InMemoryAutomationStore::new();
        let now = Utc::now();
        let job = WorkflowJob::queued(Uuid::now_v7(), 0, "webhook", json!({}), now);
        store.insert_jobs(&[job.clone()]).await.unwrap();
        store.claim_job(job.id, now).await.unwrap();

        let reclaimed = store.reclaim_stale_jobs(now).await.unwrap();
        assert!(reclaimed.is_empty());

        let reclaimed = store
            .reclaim_stale_jobs(now + Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(reclaimed, vec![job.id]);
        assert_eq!(store.job_count(JobStatus::Queued), 1);
    }

    #[tokio::test]
    async fn test_update_record_checks_collection() {
        let store = InMemoryAutomationStore::new();
        let now = Utc::now();
        let id = store
            .insert_record(Collection::Leads, Some("b1"), json!({"status": "new"}), now)
            .await
            .unwrap();

        let updated = store
            .update_record(Collection::Leads, id, json!({"status": "won"}), now)
            .await
            .unwrap();
        assert_eq!(updated.data["status"], "won");

        let wrong = store
            .update_record(Collection::Contacts, id, json!({}), now)
            .await;
        assert!(matches!(wrong, Err(StoreError::RecordNotFound { .. })));
    }
}
