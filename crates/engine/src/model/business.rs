//! Per-business automation configuration, recipes, enrollments and CRM records

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Industry used when a business has none
pub const DEFAULT_INDUSTRY: &str = "general";

/// Business profile as seen by the router
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Business {
    pub id: String,
    pub industry: Option<String>,
}

impl Business {
    pub fn industry_or_default(&self) -> &str {
        self.industry
            .as_deref()
            .filter(|i| !i.is_empty())
            .unwrap_or(DEFAULT_INDUSTRY)
    }
}

/// Automation settings of one business
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct AutomationSettings {
    pub business_id: String,
    /// Global kill switch for routing and scheduling
    #[serde(default = "default_enabled")]
    pub automations_enabled: bool,
    /// Same-intent events within this window are duplicates
    #[serde(default)]
    pub dedupe_window_minutes: Option<u32>,
    #[serde(default)]
    pub enrollment_policy: EnrollmentPolicy,
}

fn default_enabled() -> bool {
    true
}

impl AutomationSettings {
    /// Settings applied when a business has no row
    pub fn defaults_for(business_id: impl Into<String>) -> Self {
        Self {
            business_id: business_id.into(),
            automations_enabled: true,
            dedupe_window_minutes: None,
            enrollment_policy: EnrollmentPolicy::default(),
        }
    }

    pub fn dedupe_window(&self) -> Option<Duration> {
        self.dedupe_window_minutes
            .filter(|m| *m > 0)
            .map(|m| Duration::minutes(i64::from(m)))
    }
}

/// Re-entry policy for contacts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnrollmentPolicy {
    /// No restriction
    Always,

    /// A contact enters a workflow at most once
    Once,

    /// A contact may re-enter after `days` since the last enrollment
    Cooldown { days: u32 },
}

impl Default for EnrollmentPolicy {
    /// One enrollment per contact and workflow per day
    fn default() -> Self {
        Self::Cooldown { days: 1 }
    }
}

/// Last time a contact entered a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Enrollment {
    pub contact_id: Uuid,
    pub workflow_id: Uuid,
    pub enrolled_at: DateTime<Utc>,
}

/// Condition under which a conditional enrollment write succeeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentCondition {
    /// Always write
    Unconditional,

    /// Only if no enrollment exists
    IfAbsent,

    /// Only if none exists or the existing one is older than the instant
    IfEnrolledBefore(DateTime<Utc>),
}

impl EnrollmentCondition {
    /// Whether an existing enrollment permits a new one
    pub fn permits(&self, existing: Option<&Enrollment>) -> bool {
        match (self, existing) {
            (Self::Unconditional, _) | (_, None) => true,
            (Self::IfAbsent, Some(_)) => false,
            (Self::IfEnrolledBefore(cutoff), Some(e)) => e.enrolled_at < *cutoff,
        }
    }
}

/// Industry recipe: a predefined workflow template
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    /// Pack the recipe belongs to; disabling a pack disables its recipes
    pub pack_id: Option<String>,
}

/// CRM collections that actions write to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Contacts,
    Leads,
    Activities,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contacts => "contacts",
            Self::Leads => "leads",
            Self::Activities => "activities",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contacts" => Ok(Self::Contacts),
            "leads" => Ok(Self::Leads),
            "activities" => Ok(Self::Activities),
            other => Err(format!("unknown collection: {other}")),
        }
    }
}

/// A row of a CRM collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: Uuid,
    pub collection: Collection,
    pub business_id: Option<String>,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
