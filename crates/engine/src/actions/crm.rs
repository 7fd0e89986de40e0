//! CRM record actions: contacts, leads and activities

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::{parse_config, ActionContext, ActionError, ActionHandler, ActionKind, ActionOutcome};
use crate::model::Collection;

/// Source tag written on records created by workflows
const RECORD_SOURCE: &str = "automation";

fn contact_or_run_contact(
    ctx: &ActionContext<'_>,
    configured: Option<Uuid>,
) -> Option<Uuid> {
    configured.or(ctx.run.contact_id)
}

// ============================================================================
// Contacts
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateContactConfig {
    email: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    /// Extra fields copied into the record
    #[serde(default)]
    fields: Map<String, Value>,
}

/// Creates a contact; `email` is required
pub struct CreateContactAction;

#[async_trait]
impl ActionHandler for CreateContactAction {
    fn kind(&self) -> ActionKind {
        ActionKind::CreateContact
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        config: &Value,
    ) -> Result<ActionOutcome, ActionError> {
        let config: CreateContactConfig = parse_config(config)?;
        let email = config.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(ActionError::invalid_config(format!(
                "email {:?} is not an address",
                config.email
            )));
        }

        let mut data = config.fields;
        data.insert("email".into(), json!(email));
        data.insert("name".into(), json!(config.name));
        data.insert("phone".into(), json!(config.phone));
        data.insert("source".into(), json!(RECORD_SOURCE));

        let id = ctx
            .store
            .insert_record(
                Collection::Contacts,
                ctx.run.business_id.as_deref(),
                Value::Object(data),
                ctx.now,
            )
            .await?;

        debug!(contact_id = %id, "contact created");
        Ok(ActionOutcome::Completed(json!({
            "action": ActionKind::CreateContact.as_str(),
            "contact_id": id,
            "email": email,
        })))
    }
}

#[derive(Debug, Deserialize)]
struct UpdateContactConfig {
    #[serde(default)]
    contact_id: Option<Uuid>,
    fields: Map<String, Value>,
}

/// Merges `fields` into a contact (defaults to the run's contact)
pub struct UpdateContactAction;

#[async_trait]
impl ActionHandler for UpdateContactAction {
    fn kind(&self) -> ActionKind {
        ActionKind::UpdateContact
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        config: &Value,
    ) -> Result<ActionOutcome, ActionError> {
        let config: UpdateContactConfig = parse_config(config)?;
        let contact_id = contact_or_run_contact(ctx, config.contact_id)
            .ok_or_else(|| ActionError::invalid_config("contact_id is required"))?;

        let updated: Vec<_> = config.fields.keys().cloned().collect();
        ctx.store
            .update_record(
                Collection::Contacts,
                contact_id,
                Value::Object(config.fields),
                ctx.now,
            )
            .await?;

        Ok(ActionOutcome::Completed(json!({
            "action": ActionKind::UpdateContact.as_str(),
            "contact_id": contact_id,
            "updated_fields": updated,
        })))
    }
}

// ============================================================================
// Leads
// ============================================================================

fn default_lead_status() -> String {
    "new".to_string()
}

#[derive(Debug, Deserialize)]
struct CreateLeadConfig {
    #[serde(default)]
    contact_id: Option<Uuid>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default = "default_lead_status")]
    status: String,
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    fields: Map<String, Value>,
}

/// Creates a lead, linked to the run's contact unless one is configured
pub struct CreateLeadAction;

#[async_trait]
impl ActionHandler for CreateLeadAction {
    fn kind(&self) -> ActionKind {
        ActionKind::CreateLead
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        config: &Value,
    ) -> Result<ActionOutcome, ActionError> {
        let config: CreateLeadConfig = parse_config(config)?;
        let contact_id = contact_or_run_contact(ctx, config.contact_id);

        let mut data = config.fields;
        data.insert("contact_id".into(), json!(contact_id));
        data.insert("title".into(), json!(config.title));
        data.insert("status".into(), json!(config.status));
        data.insert("value".into(), json!(config.value));
        data.insert("source".into(), json!(RECORD_SOURCE));

        let id = ctx
            .store
            .insert_record(
                Collection::Leads,
                ctx.run.business_id.as_deref(),
                Value::Object(data),
                ctx.now,
            )
            .await?;

        Ok(ActionOutcome::Completed(json!({
            "action": ActionKind::CreateLead.as_str(),
            "lead_id": id,
            "status": config.status,
        })))
    }
}

#[derive(Debug, Deserialize)]
struct UpdateLeadStatusConfig {
    lead_id: Uuid,
    status: String,
}

/// Sets a lead's status
pub struct UpdateLeadStatusAction;

#[async_trait]
impl ActionHandler for UpdateLeadStatusAction {
    fn kind(&self) -> ActionKind {
        ActionKind::UpdateLeadStatus
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        config: &Value,
    ) -> Result<ActionOutcome, ActionError> {
        let config: UpdateLeadStatusConfig = parse_config(config)?;
        if config.status.trim().is_empty() {
            return Err(ActionError::invalid_config("status must not be empty"));
        }

        let previous = ctx
            .store
            .get_record(Collection::Leads, config.lead_id)
            .await?
            .and_then(|r| r.data.get("status").cloned());

        ctx.store
            .update_record(
                Collection::Leads,
                config.lead_id,
                json!({ "status": config.status }),
                ctx.now,
            )
            .await?;

        Ok(ActionOutcome::Completed(json!({
            "action": ActionKind::UpdateLeadStatus.as_str(),
            "lead_id": config.lead_id,
            "previous_status": previous,
            "status": config.status,
        })))
    }
}

// ============================================================================
// Activities
// ============================================================================

fn default_activity_type() -> String {
    "note".to_string()
}

#[derive(Debug, Deserialize)]
struct CreateActivityConfig {
    #[serde(default = "default_activity_type", rename = "type")]
    activity_type: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    contact_id: Option<Uuid>,
    #[serde(default)]
    lead_id: Option<Uuid>,
}

/// Appends an activity to the timeline
pub struct CreateActivityAction;

#[async_trait]
impl ActionHandler for CreateActivityAction {
    fn kind(&self) -> ActionKind {
        ActionKind::CreateActivity
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        config: &Value,
    ) -> Result<ActionOutcome, ActionError> {
        let config: CreateActivityConfig = parse_config(config)?;

        let data = json!({
            "type": config.activity_type,
            "description": config.description,
            "contact_id": contact_or_run_contact(ctx, config.contact_id),
            "lead_id": config.lead_id,
            "workflow_run_id": ctx.run.id,
            "source": RECORD_SOURCE,
        });

        let id = ctx
            .store
            .insert_record(
                Collection::Activities,
                ctx.run.business_id.as_deref(),
                data,
                ctx.now,
            )
            .await?;

        Ok(ActionOutcome::Completed(json!({
            "action": ActionKind::CreateActivity.as_str(),
            "activity_id": id,
        })))
    }
}
