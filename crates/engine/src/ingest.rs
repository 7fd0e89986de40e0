//! Event ingestion with deduplication
//!
//! An event is a duplicate when its `(business_id, dedupe_key)` already exists
//! or, if the business configures a dedupe window, when an event with the
//! same intent occurred within that window.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{AutomationSettings, Event, NewEvent};
use crate::persistence::{AutomationStore, InsertOutcome};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Why an event was classified as a duplicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum DuplicateReason {
    DedupeKey,
    Window,
}

/// Result of ingesting one event
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Stored; callers route it next
    Accepted(Event),

    /// Not stored; `event_id` is the event it duplicates
    Duplicate {
        event_id: Uuid,
        reason: DuplicateReason,
    },
}

impl IngestOutcome {
    pub fn event_id(&self) -> Uuid {
        match self {
            Self::Accepted(event) => event.id,
            Self::Duplicate { event_id, .. } => *event_id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// Writes events to the store, suppressing duplicates
#[derive(Clone)]
pub struct EventIngestor {
    store: Arc<dyn AutomationStore>,
}

impl EventIngestor {
    pub fn new(store: Arc<dyn AutomationStore>) -> Self {
        Self { store }
    }

    /// Ingest an event occurring now
    pub async fn ingest(&self, event: NewEvent) -> Result<IngestOutcome, EngineError> {
        self.ingest_at(event, Utc::now()).await
    }

    /// Ingest an event occurring at `now`
    #[instrument(skip(self, event), fields(business_id = %event.business_id, intent = %event.intent))]
    pub async fn ingest_at(
        &self,
        event: NewEvent,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, EngineError> {
        if event.business_id.trim().is_empty() {
            return Err(EngineError::InvalidInput("business_id is required".into()));
        }
        if event.intent.trim().is_empty() {
            return Err(EngineError::InvalidInput("intent is required".into()));
        }

        let settings = self
            .store
            .get_settings(&event.business_id)
            .await?
            .unwrap_or_else(|| AutomationSettings::defaults_for(&event.business_id));

        if let Some(window) = settings.dedupe_window() {
            let recent = self
                .store
                .find_recent_event(&event.business_id, &event.intent, now - window)
                .await?;
            if let Some(recent) = recent {
                debug!(event_id = %recent.id, "event suppressed by dedupe window");
                return Ok(IngestOutcome::Duplicate {
                    event_id: recent.id,
                    reason: DuplicateReason::Window,
                });
            }
        }

        let event = event.into_event(now);
        match self.store.insert_event(&event).await? {
            InsertOutcome::Inserted => {
                info!(event_id = %event.id, dedupe_key = %event.dedupe_key, "event ingested");
                Ok(IngestOutcome::Accepted(event))
            }
            InsertOutcome::Existing(event_id) => {
                debug!(%event_id, dedupe_key = %event.dedupe_key, "duplicate event key");
                Ok(IngestOutcome::Duplicate {
                    event_id,
                    reason: DuplicateReason::DedupeKey,
                })
            }
        }
    }
}
