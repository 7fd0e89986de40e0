// Business automation settings HTTP routes

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use flowline_engine::model::{AutomationSettings, EnrollmentPolicy};
use serde::Deserialize;
use utoipa::ToSchema;

use super::common::{engine_error, ApiError, ErrorResponse};
use super::AppState;

/// Request to update settings. Only provided fields will be updated.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateSettingsRequest {
    /// Global switch for routing and scheduling.
    pub automations_enabled: Option<bool>,
    /// Same-intent window in minutes; 0 disables it.
    #[schema(example = 10)]
    pub dedupe_window_minutes: Option<u32>,
    pub enrollment_policy: Option<EnrollmentPolicy>,
}

impl UpdateSettingsRequest {
    fn apply(self, settings: &mut AutomationSettings) {
        if let Some(enabled) = self.automations_enabled {
            settings.automations_enabled = enabled;
        }
        if let Some(minutes) = self.dedupe_window_minutes {
            settings.dedupe_window_minutes = (minutes > 0).then_some(minutes);
        }
        if let Some(policy) = self.enrollment_policy {
            settings.enrollment_policy = policy;
        }
    }
}

/// Create settings routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/businesses/:business_id/settings",
            get(get_settings).patch(update_settings),
        )
        .with_state(state)
}

/// GET /v1/businesses/{business_id}/settings - Get automation settings
#[utoipa::path(
    get,
    path = "/v1/businesses/{business_id}/settings",
    params(
        ("business_id" = String, Path, description = "Business ID")
    ),
    responses(
        (status = 200, description = "Stored or default settings", body = AutomationSettings),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "settings"
)]
pub async fn get_settings(
    State(state): State<AppState>,
    Path(business_id): Path<String>,
) -> Result<Json<AutomationSettings>, ApiError> {
    let settings = state
        .engine
        .settings(&business_id)
        .await
        .map_err(|e| engine_error("get settings", e))?;
    Ok(Json(settings))
}

/// PATCH /v1/businesses/{business_id}/settings - Update automation settings
#[utoipa::path(
    patch,
    path = "/v1/businesses/{business_id}/settings",
    params(
        ("business_id" = String, Path, description = "Business ID")
    ),
    request_body = UpdateSettingsRequest,
    responses(
        (status = 200, description = "Settings updated", body = AutomationSettings),
        (status = 400, description = "Invalid settings", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "settings"
)]
pub async fn update_settings(
    State(state): State<AppState>,
    Path(business_id): Path<String>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<AutomationSettings>, ApiError> {
    let mut settings = state
        .engine
        .settings(&business_id)
        .await
        .map_err(|e| engine_error("get settings", e))?;
    req.apply(&mut settings);

    state
        .engine
        .save_settings(&settings)
        .await
        .map_err(|e| engine_error("update settings", e))?;
    Ok(Json(settings))
}
