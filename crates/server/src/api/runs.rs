// Workflow run HTTP routes

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use flowline_engine::model::{WorkflowJob, WorkflowRun};
use flowline_engine::ProcessResult;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::{engine_error, ApiError, ErrorResponse};
use super::AppState;

/// A run with its jobs in step order
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RunResponse {
    #[serde(flatten)]
    pub run: WorkflowRun,
    pub jobs: Vec<WorkflowJob>,
}

/// Create run routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/runs/:run_id", get(get_run))
        .route("/v1/runs/:run_id/process", post(process_run))
        .with_state(state)
}

/// GET /v1/runs/{run_id} - Get a run and its jobs
#[utoipa::path(
    get,
    path = "/v1/runs/{run_id}",
    params(
        ("run_id" = Uuid, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Run found", body = RunResponse),
        (status = 404, description = "Run not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "runs"
)]
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunResponse>, ApiError> {
    let (run, jobs) = state
        .engine
        .run_status(run_id)
        .await
        .map_err(|e| engine_error("get run", e))?;
    Ok(Json(RunResponse { run, jobs }))
}

/// POST /v1/runs/{run_id}/process - Process the due jobs of a run
#[utoipa::path(
    post,
    path = "/v1/runs/{run_id}/process",
    params(
        ("run_id" = Uuid, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Processing pass finished", body = ProcessResult),
        (status = 404, description = "Run not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "runs"
)]
pub async fn process_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ProcessResult>, ApiError> {
    let result = state
        .engine
        .process_run(run_id)
        .await
        .map_err(|e| engine_error("process run", e))?;
    Ok(Json(result))
}
