//! PostgreSQL implementation of AutomationStore
//!
//! Production persistence using PostgreSQL with:
//! - Unique constraints for event and run idempotency
//! - Conditional UPDATEs for job claims and schedule triggers
//! - `INSERT .. ON CONFLICT .. WHERE` for conditional enrollments

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::store::*;
use crate::model::{
    AutomationSettings, Business, Collection, Enrollment, EnrollmentCondition, Event, JobStatus,
    Recipe, Record, RunStatus, WorkflowDefinition, WorkflowJob, WorkflowRun,
};

/// PostgreSQL implementation of AutomationStore
///
/// # Example
///
/// ```ignore
/// use flowline_engine::PostgresAutomationStore;
///
/// let store = PostgresAutomationStore::connect("postgres://localhost/flowline", 10).await?;
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresAutomationStore {
    pool: PgPool,
}

impl PostgresAutomationStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(db_error("connect"))?;
        Ok(Self::new(pool))
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        info!("database migrations completed");
        Ok(())
    }
}

fn db_error(operation: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| {
        error!("Failed to {}: {}", operation, e);
        StoreError::Database(e.to_string())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn parse<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T, StoreError> {
    value.parse().map_err(StoreError::Serialization)
}

fn from_json<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn event_from_row(row: &PgRow) -> Event {
    Event {
        id: row.get("id"),
        business_id: row.get("business_id"),
        intent: row.get("intent"),
        payload: row.get("payload"),
        dedupe_key: row.get("dedupe_key"),
        contact_id: row.get("contact_id"),
        source: row.get("source"),
        occurred_at: row.get("occurred_at"),
        processed: row.get("processed"),
    }
}

fn workflow_from_row(row: &PgRow) -> Result<WorkflowDefinition, StoreError> {
    Ok(WorkflowDefinition {
        id: row.get("id"),
        business_id: row.get("business_id"),
        industry: row.get("industry"),
        name: row.get("name"),
        trigger: from_json(row.get("trigger"))?,
        steps: from_json(row.get("steps"))?,
        is_active: row.get("is_active"),
        priority: row.get("priority"),
        recipe_id: row.get("recipe_id"),
        last_run_at: row.get("last_run_at"),
    })
}

fn run_from_row(row: &PgRow) -> Result<WorkflowRun, StoreError> {
    let status: String = row.get("status");
    Ok(WorkflowRun {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        business_id: row.get("business_id"),
        event_id: row.get("event_id"),
        contact_id: row.get("contact_id"),
        status: parse::<RunStatus>(&status)?,
        context: row.get("context"),
        idempotency_key: row.get("idempotency_key"),
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
        result: row.get("result"),
    })
}

fn job_from_row(row: &PgRow) -> Result<WorkflowJob, StoreError> {
    let status: String = row.get("status");
    let retry_count: i32 = row.get("retry_count");
    Ok(WorkflowJob {
        id: row.get("id"),
        workflow_run_id: row.get("workflow_run_id"),
        step_index: row.get("step_index"),
        action_type: row.get("action_type"),
        action_config: row.get("action_config"),
        status: parse::<JobStatus>(&status)?,
        retry_count: retry_count.max(0) as u32,
        scheduled_at: row.get("scheduled_at"),
        claimed_at: row.get("claimed_at"),
        processed_at: row.get("processed_at"),
        error_message: row.get("error_message"),
        result: row.get("result"),
    })
}

fn record_from_row(row: &PgRow) -> Result<Record, StoreError> {
    let collection: String = row.get("collection");
    Ok(Record {
        id: row.get("id"),
        collection: parse::<Collection>(&collection)?,
        business_id: row.get("business_id"),
        data: row.get("data"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const WORKFLOW_COLUMNS: &str = "id, business_id, industry, name, trigger, steps, is_active, \
     priority, recipe_id, last_run_at";

const RUN_COLUMNS: &str = "id, workflow_id, business_id, event_id, contact_id, status, context, \
     idempotency_key, created_at, completed_at, result";

const JOB_COLUMNS: &str = "id, workflow_run_id, step_index, action_type, action_config, status, \
     retry_count, scheduled_at, claimed_at, processed_at, error_message, result";

async fn insert_job_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    job: &WorkflowJob,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_jobs
            (id, workflow_run_id, step_index, action_type, action_config, status,
             retry_count, scheduled_at, claimed_at, processed_at, error_message, result)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(job.id)
    .bind(job.workflow_run_id)
    .bind(job.step_index)
    .bind(&job.action_type)
    .bind(&job.action_config)
    .bind(job.status.as_str())
    .bind(job.retry_count as i32)
    .bind(job.scheduled_at)
    .bind(job.claimed_at)
    .bind(job.processed_at)
    .bind(&job.error_message)
    .bind(&job.result)
    .execute(&mut **tx)
    .await
    .map_err(db_error("insert job"))?;
    Ok(())
}

#[async_trait]
impl AutomationStore for PostgresAutomationStore {
    // =========================================================================
    // Business Configuration
    // =========================================================================

    #[instrument(skip(self))]
    async fn get_business(&self, business_id: &str) -> Result<Option<Business>, StoreError> {
        let row = sqlx::query("SELECT id, industry FROM businesses WHERE id = $1")
            .bind(business_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get business"))?;

        Ok(row.map(|row| Business {
            id: row.get("id"),
            industry: row.get("industry"),
        }))
    }

    #[instrument(skip(self))]
    async fn get_settings(
        &self,
        business_id: &str,
    ) -> Result<Option<AutomationSettings>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT business_id, automations_enabled, dedupe_window_minutes, enrollment_policy
            FROM business_automation_settings
            WHERE business_id = $1
            "#,
        )
        .bind(business_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get settings"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let window: Option<i32> = row.get("dedupe_window_minutes");
        Ok(Some(AutomationSettings {
            business_id: row.get("business_id"),
            automations_enabled: row.get("automations_enabled"),
            dedupe_window_minutes: window.map(|m| m.max(0) as u32),
            enrollment_policy: from_json(row.get("enrollment_policy"))?,
        }))
    }

    #[instrument(skip(self, settings), fields(business_id = %settings.business_id))]
    async fn save_settings(&self, settings: &AutomationSettings) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO business_automation_settings
                (business_id, automations_enabled, dedupe_window_minutes, enrollment_policy)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (business_id) DO UPDATE
            SET automations_enabled = EXCLUDED.automations_enabled,
                dedupe_window_minutes = EXCLUDED.dedupe_window_minutes,
                enrollment_policy = EXCLUDED.enrollment_policy
            "#,
        )
        .bind(&settings.business_id)
        .bind(settings.automations_enabled)
        .bind(settings.dedupe_window_minutes.map(|m| m as i32))
        .bind(to_json(&settings.enrollment_policy)?)
        .execute(&self.pool)
        .await
        .map_err(db_error("save settings"))?;

        Ok(())
    }

    // =========================================================================
    // Event Operations
    // =========================================================================

    #[instrument(skip(self, event), fields(event_id = %event.id))]
    async fn insert_event(&self, event: &Event) -> Result<InsertOutcome, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO events
                (id, business_id, intent, payload, dedupe_key, contact_id, source, occurred_at, processed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (business_id, dedupe_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(event.id)
        .bind(&event.business_id)
        .bind(&event.intent)
        .bind(&event.payload)
        .bind(&event.dedupe_key)
        .bind(event.contact_id)
        .bind(&event.source)
        .bind(event.occurred_at)
        .bind(event.processed)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("insert event"))?;

        if inserted.is_some() {
            debug!(event_id = %event.id, intent = %event.intent, "inserted event");
            return Ok(InsertOutcome::Inserted);
        }

        let existing: Uuid =
            sqlx::query("SELECT id FROM events WHERE business_id = $1 AND dedupe_key = $2")
                .bind(&event.business_id)
                .bind(&event.dedupe_key)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error("find duplicate event"))?
                .get("id");

        Ok(InsertOutcome::Existing(existing))
    }

    #[instrument(skip(self))]
    async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query("SELECT * FROM events WHERE id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get event"))?;

        Ok(row.as_ref().map(event_from_row))
    }

    #[instrument(skip(self))]
    async fn find_recent_event(
        &self,
        business_id: &str,
        intent: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM events
            WHERE business_id = $1 AND intent = $2 AND occurred_at >= $3
            ORDER BY occurred_at DESC
            LIMIT 1
            "#,
        )
        .bind(business_id)
        .bind(intent)
        .bind(since)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("find recent event"))?;

        Ok(row.as_ref().map(event_from_row))
    }

    #[instrument(skip(self))]
    async fn mark_event_processed(&self, event_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE events SET processed = TRUE WHERE id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("mark event processed"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_unprocessed_events(
        &self,
        occurred_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM events
            WHERE NOT processed AND occurred_at < $1
            ORDER BY occurred_at
            LIMIT $2
            "#,
        )
        .bind(occurred_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list unprocessed events"))?;

        Ok(rows.iter().map(event_from_row).collect())
    }

    // =========================================================================
    // Workflow Definitions
    // =========================================================================

    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id))]
    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_definitions
                (id, business_id, industry, name, trigger_type, trigger, steps,
                 is_active, priority, recipe_id, last_run_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE
            SET business_id = EXCLUDED.business_id,
                industry = EXCLUDED.industry,
                name = EXCLUDED.name,
                trigger_type = EXCLUDED.trigger_type,
                trigger = EXCLUDED.trigger,
                steps = EXCLUDED.steps,
                is_active = EXCLUDED.is_active,
                priority = EXCLUDED.priority,
                recipe_id = EXCLUDED.recipe_id
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.business_id)
        .bind(&workflow.industry)
        .bind(&workflow.name)
        .bind(workflow.trigger.kind())
        .bind(to_json(&workflow.trigger)?)
        .bind(to_json(&workflow.steps)?)
        .bind(workflow.is_active)
        .bind(workflow.priority)
        .bind(&workflow.recipe_id)
        .bind(workflow.last_run_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("save workflow"))?;

        debug!(workflow_id = %workflow.id, name = %workflow.name, "saved workflow");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<WorkflowDefinition>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflow_definitions WHERE id = $1"
        ))
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get workflow"))?;

        row.as_ref().map(workflow_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_event_workflows(
        &self,
        business_id: &str,
    ) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {WORKFLOW_COLUMNS} FROM workflow_definitions
            WHERE business_id = $1 AND trigger_type = 'event' AND is_active
            ORDER BY id
            "#
        ))
        .bind(business_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list event workflows"))?;

        rows.iter().map(workflow_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn list_schedule_workflows(&self) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {WORKFLOW_COLUMNS} FROM workflow_definitions
            WHERE trigger_type = 'schedule' AND is_active
            ORDER BY id
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list schedule workflows"))?;

        rows.iter().map(workflow_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn compare_and_set_last_run(
        &self,
        workflow_id: Uuid,
        expected: Option<DateTime<Utc>>,
        next: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_definitions
            SET last_run_at = $3
            WHERE id = $1 AND last_run_at IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(workflow_id)
        .bind(expected)
        .bind(next)
        .execute(&self.pool)
        .await
        .map_err(db_error("update last run"))?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Recipes
    // =========================================================================

    #[instrument(skip(self))]
    async fn list_recipe_ids(
        &self,
        intent: &str,
        industry: &str,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT recipe_id FROM recipe_mappings WHERE intent = $1 AND industry = $2 ORDER BY recipe_id",
        )
        .bind(intent)
        .bind(industry)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list recipe mappings"))?;

        Ok(rows.iter().map(|row| row.get("recipe_id")).collect())
    }

    #[instrument(skip(self))]
    async fn get_recipe(&self, recipe_id: &str) -> Result<Option<Recipe>, StoreError> {
        let row = sqlx::query("SELECT id, name, pack_id FROM recipes WHERE id = $1")
            .bind(recipe_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get recipe"))?;

        Ok(row.map(|row| Recipe {
            id: row.get("id"),
            name: row.get("name"),
            pack_id: row.get("pack_id"),
        }))
    }

    #[instrument(skip(self))]
    async fn find_recipe_workflow(
        &self,
        recipe_id: &str,
        industry: &str,
    ) -> Result<Option<WorkflowDefinition>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {WORKFLOW_COLUMNS} FROM workflow_definitions
            WHERE recipe_id = $1 AND industry = $2
            ORDER BY id
            LIMIT 1
            "#
        ))
        .bind(recipe_id)
        .bind(industry)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("find recipe workflow"))?;

        row.as_ref().map(workflow_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn get_recipe_toggle(
        &self,
        business_id: &str,
        recipe_id: &str,
    ) -> Result<Option<bool>, StoreError> {
        let row = sqlx::query(
            "SELECT enabled FROM recipe_toggles WHERE business_id = $1 AND recipe_id = $2",
        )
        .bind(business_id)
        .bind(recipe_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get recipe toggle"))?;

        Ok(row.map(|row| row.get("enabled")))
    }

    #[instrument(skip(self))]
    async fn get_pack_toggle(
        &self,
        business_id: &str,
        pack_id: &str,
    ) -> Result<Option<bool>, StoreError> {
        let row =
            sqlx::query("SELECT enabled FROM pack_toggles WHERE business_id = $1 AND pack_id = $2")
                .bind(business_id)
                .bind(pack_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error("get pack toggle"))?;

        Ok(row.map(|row| row.get("enabled")))
    }

    // =========================================================================
    // Enrollments
    // =========================================================================

    #[instrument(skip(self))]
    async fn get_enrollment(
        &self,
        contact_id: Uuid,
        workflow_id: Uuid,
    ) -> Result<Option<Enrollment>, StoreError> {
        let row = sqlx::query(
            "SELECT enrolled_at FROM enrollments WHERE contact_id = $1 AND workflow_id = $2",
        )
        .bind(contact_id)
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get enrollment"))?;

        Ok(row.map(|row| Enrollment {
            contact_id,
            workflow_id,
            enrolled_at: row.get("enrolled_at"),
        }))
    }

    #[instrument(skip(self))]
    async fn try_enroll(
        &self,
        contact_id: Uuid,
        workflow_id: Uuid,
        at: DateTime<Utc>,
        condition: EnrollmentCondition,
    ) -> Result<bool, StoreError> {
        // The conflict branch only updates when the condition holds; a
        // missing RETURNING row means the existing enrollment blocked us.
        let (mode, cutoff) = match condition {
            EnrollmentCondition::Unconditional => ("always", None),
            EnrollmentCondition::IfAbsent => ("absent", None),
            EnrollmentCondition::IfEnrolledBefore(cutoff) => ("before", Some(cutoff)),
        };

        let row = sqlx::query(
            r#"
            INSERT INTO enrollments (contact_id, workflow_id, enrolled_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (contact_id, workflow_id) DO UPDATE
            SET enrolled_at = EXCLUDED.enrolled_at
            WHERE $4 = 'always'
               OR ($4 = 'before' AND enrollments.enrolled_at < $5)
            RETURNING contact_id
            "#,
        )
        .bind(contact_id)
        .bind(workflow_id)
        .bind(at)
        .bind(mode)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("enroll contact"))?;

        Ok(row.is_some())
    }

    // =========================================================================
    // Run Operations
    // =========================================================================

    #[instrument(skip(self, run, jobs), fields(run_id = %run.id, jobs = jobs.len()))]
    async fn insert_run(
        &self,
        run: &WorkflowRun,
        jobs: &[WorkflowJob],
    ) -> Result<InsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO workflow_runs
                (id, workflow_id, business_id, event_id, contact_id, status, context,
                 idempotency_key, created_at, completed_at, result)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(run.id)
        .bind(run.workflow_id)
        .bind(&run.business_id)
        .bind(run.event_id)
        .bind(run.contact_id)
        .bind(run.status.as_str())
        .bind(&run.context)
        .bind(&run.idempotency_key)
        .bind(run.created_at)
        .bind(run.completed_at)
        .bind(&run.result)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("insert run"))?;

        if inserted.is_none() {
            tx.rollback().await.map_err(db_error("rollback run"))?;
            let existing: Uuid =
                sqlx::query("SELECT id FROM workflow_runs WHERE idempotency_key = $1")
                    .bind(&run.idempotency_key)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(db_error("find existing run"))?
                    .get("id");
            return Ok(InsertOutcome::Existing(existing));
        }

        for job in jobs {
            insert_job_row(&mut tx, job).await?;
        }
        tx.commit().await.map_err(db_error("commit run"))?;

        debug!(run_id = %run.id, key = %run.idempotency_key, "inserted run");
        Ok(InsertOutcome::Inserted)
    }

    #[instrument(skip(self))]
    async fn get_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = $1"
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get run"))?;

        row.as_ref().map(run_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn find_run_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<WorkflowRun>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("find run"))?;

        row.as_ref().map(run_from_row).transpose()
    }

    #[instrument(skip(self, result))]
    async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        result: serde_json::Value,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = $2, result = $3, completed_at = $4
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(&result)
        .bind(completed_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("finalize run"))?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(())
    }

    // =========================================================================
    // Job Queue Operations
    // =========================================================================

    #[instrument(skip(self, jobs), fields(count = jobs.len()))]
    async fn insert_jobs(&self, jobs: &[WorkflowJob]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;
        for job in jobs {
            insert_job_row(&mut tx, job).await?;
        }
        tx.commit().await.map_err(db_error("commit jobs"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_jobs(&self, run_id: Uuid) -> Result<Vec<WorkflowJob>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM workflow_jobs WHERE workflow_run_id = $1 ORDER BY step_index"
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list jobs"))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn claim_job(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_jobs
            SET status = 'processing', claimed_at = $2
            WHERE id = $1 AND status = 'queued' AND scheduled_at <= $2
            "#,
        )
        .bind(job_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("claim job"))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, result))]
    async fn complete_job(
        &self,
        job_id: Uuid,
        result: serde_json::Value,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE workflow_jobs
            SET status = 'completed', result = $2, processed_at = $3
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(&result)
        .bind(processed_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("complete job"))?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job_id));
        }
        Ok(())
    }

    #[instrument(skip(self, result))]
    async fn requeue_job(
        &self,
        job_id: Uuid,
        retry_count: u32,
        scheduled_at: DateTime<Utc>,
        error_message: Option<&str>,
        result: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE workflow_jobs
            SET status = 'queued',
                retry_count = $2,
                scheduled_at = $3,
                claimed_at = NULL,
                error_message = COALESCE($4, error_message),
                result = COALESCE($5, result)
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(retry_count as i32)
        .bind(scheduled_at)
        .bind(error_message)
        .bind(result)
        .execute(&self.pool)
        .await
        .map_err(db_error("requeue job"))?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fail_job(
        &self,
        job_id: Uuid,
        retry_count: u32,
        error_message: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE workflow_jobs
            SET status = 'failed', retry_count = $2, error_message = $3, processed_at = $4
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(retry_count as i32)
        .bind(error_message)
        .bind(processed_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("fail job"))?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_runnable_jobs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowJob>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM (
                SELECT DISTINCT ON (workflow_run_id) {JOB_COLUMNS}
                FROM workflow_jobs
                WHERE status IN ('queued', 'processing')
                ORDER BY workflow_run_id, step_index
            ) head
            WHERE status = 'queued' AND scheduled_at <= $1
            ORDER BY scheduled_at, step_index
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list runnable jobs"))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn reclaim_stale_jobs(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE workflow_jobs
            SET status = 'queued', claimed_at = NULL
            WHERE status = 'processing'
              AND (claimed_at IS NULL OR claimed_at < $1)
            RETURNING id
            "#,
        )
        .bind(claimed_before)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("reclaim stale jobs"))?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    // =========================================================================
    // CRM Records
    // =========================================================================

    #[instrument(skip(self, data))]
    async fn insert_record(
        &self,
        collection: Collection,
        business_id: Option<&str>,
        data: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO crm_records (id, collection, business_id, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            "#,
        )
        .bind(id)
        .bind(collection.as_str())
        .bind(business_id)
        .bind(&data)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_error("insert record"))?;

        debug!(%id, %collection, "inserted record");
        Ok(id)
    }

    #[instrument(skip(self, patch))]
    async fn update_record(
        &self,
        collection: Collection,
        id: Uuid,
        patch: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<Record, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE crm_records
            SET data = CASE
                    WHEN jsonb_typeof(data) = 'object' AND jsonb_typeof($3) = 'object'
                    THEN data || $3
                    ELSE $3
                END,
                updated_at = $4
            WHERE id = $1 AND collection = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(collection.as_str())
        .bind(&patch)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("update record"))?
        .ok_or(StoreError::RecordNotFound { collection, id })?;

        record_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn get_record(
        &self,
        collection: Collection,
        id: Uuid,
    ) -> Result<Option<Record>, StoreError> {
        let row = sqlx::query("SELECT * FROM crm_records WHERE id = $1 AND collection = $2")
            .bind(id)
            .bind(collection.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get record"))?;

        row.as_ref().map(record_from_row).transpose()
    }
}
