// Scheduler HTTP routes
//
// Lets an external cron drive the scheduler when the in-process loop is
// disabled (SCHEDULER_INTERVAL_SECS=0).

use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use flowline_engine::TickReport;

use super::common::{engine_error, ApiError, ErrorResponse};
use super::AppState;

/// Create scheduler routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/scheduler/tick", post(tick))
        .with_state(state)
}

/// POST /v1/scheduler/tick - Run one scheduler tick now
#[utoipa::path(
    post,
    path = "/v1/scheduler/tick",
    responses(
        (status = 200, description = "Tick finished", body = TickReport),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "scheduler"
)]
pub async fn tick(State(state): State<AppState>) -> Result<Json<TickReport>, ApiError> {
    let report = state
        .engine
        .tick(Utc::now())
        .await
        .map_err(|e| engine_error("run scheduler tick", e))?;
    Ok(Json(report))
}
