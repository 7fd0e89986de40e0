// Event ingestion HTTP routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use flowline_engine::model::{Event, NewEvent};
use flowline_engine::SubmitOutcome;
use uuid::Uuid;

use super::common::{engine_error, ApiError, ErrorResponse};
use super::AppState;

/// Create event routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/events", post(submit_event))
        .route("/v1/events/:event_id", get(get_event))
        .with_state(state)
}

/// POST /v1/events - Submit a business event
///
/// Accepted events are routed and their runs triggered before the response
/// is sent. A duplicate returns the id of the stored event.
#[utoipa::path(
    post,
    path = "/v1/events",
    request_body = NewEvent,
    responses(
        (status = 202, description = "Event accepted and routed", body = SubmitOutcome),
        (status = 200, description = "Duplicate of a stored event", body = SubmitOutcome),
        (status = 400, description = "Invalid event", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "events"
)]
pub async fn submit_event(
    State(state): State<AppState>,
    Json(event): Json<NewEvent>,
) -> Result<(StatusCode, Json<SubmitOutcome>), ApiError> {
    let outcome = state
        .engine
        .submit_event(event)
        .await
        .map_err(|e| engine_error("submit event", e))?;

    let status = match outcome {
        SubmitOutcome::Accepted { .. } => StatusCode::ACCEPTED,
        SubmitOutcome::Duplicate { .. } => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

/// GET /v1/events/{event_id} - Get a stored event
#[utoipa::path(
    get,
    path = "/v1/events/{event_id}",
    params(
        ("event_id" = Uuid, Path, description = "Event ID")
    ),
    responses(
        (status = 200, description = "Event found", body = Event),
        (status = 404, description = "Event not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "events"
)]
pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Event>, ApiError> {
    let event = state
        .engine
        .get_event(event_id)
        .await
        .map_err(|e| engine_error("get event", e))?;
    Ok(Json(event))
}
