//! Inbound business events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Source recorded when the caller does not name one
pub const DEFAULT_EVENT_SOURCE: &str = "api";

/// A business event as stored in the event log
///
/// Identity is `(business_id, dedupe_key)`. Events are immutable once written,
/// except for the `processed` flag set after routing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Event {
    pub id: Uuid,
    pub business_id: String,
    /// Semantic tag, e.g. `contact.submit`
    pub intent: String,
    pub payload: serde_json::Value,
    pub dedupe_key: String,
    pub contact_id: Option<Uuid>,
    pub source: String,
    pub occurred_at: DateTime<Utc>,
    pub processed: bool,
}

/// Input for [`EventIngestor::ingest`](crate::ingest::EventIngestor::ingest)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct NewEvent {
    pub business_id: String,
    pub intent: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub dedupe_key: Option<String>,
    #[serde(default)]
    pub contact_id: Option<Uuid>,
    #[serde(default)]
    pub source: Option<String>,
}

impl NewEvent {
    pub fn new(business_id: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            business_id: business_id.into(),
            intent: intent.into(),
            payload: serde_json::Value::Null,
            dedupe_key: None,
            contact_id: None,
            source: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn with_contact(mut self, contact_id: Uuid) -> Self {
        self.contact_id = Some(contact_id);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Materialize the stored event
    ///
    /// A missing dedupe key becomes a fresh UUID v7, so only the dedupe
    /// window can suppress such an event.
    pub fn into_event(self, occurred_at: DateTime<Utc>) -> Event {
        Event {
            id: Uuid::now_v7(),
            business_id: self.business_id,
            intent: self.intent,
            payload: self.payload,
            dedupe_key: self
                .dedupe_key
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| Uuid::now_v7().to_string()),
            contact_id: self.contact_id,
            source: self
                .source
                .unwrap_or_else(|| DEFAULT_EVENT_SOURCE.to_string()),
            occurred_at,
            processed: false,
        }
    }
}
