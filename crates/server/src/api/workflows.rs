// Workflow definition HTTP routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use flowline_engine::model::{Step, WorkflowDefinition, WorkflowTrigger};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common::{engine_error, ApiError, ErrorResponse, ListResponse};
use super::AppState;

/// Request to create a workflow
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateWorkflowRequest {
    /// Display name.
    #[schema(example = "New lead follow-up")]
    pub name: String,
    /// Owning business. Required unless `recipe_id` is set.
    pub business_id: Option<String>,
    /// Industry of a recipe workflow.
    pub industry: Option<String>,
    /// Recipe this workflow implements.
    pub recipe_id: Option<String>,
    pub trigger: WorkflowTrigger,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Lower runs first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl CreateWorkflowRequest {
    fn into_definition(self) -> WorkflowDefinition {
        let mut workflow = WorkflowDefinition::new(self.name, self.trigger).with_priority(self.priority);
        workflow.business_id = self.business_id;
        workflow.industry = self.industry;
        workflow.recipe_id = self.recipe_id;
        workflow.steps = self.steps;
        workflow.is_active = self.is_active;
        workflow
    }
}

/// Query parameters for route resolution
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct RoutesQuery {
    /// Intent to resolve, e.g. `contact.submit`
    pub intent: String,
}

/// Create workflow routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/workflows", post(create_workflow))
        .route("/v1/workflows/:workflow_id", get(get_workflow))
        .route("/v1/businesses/:business_id/routes", get(resolve_routes))
        .with_state(state)
}

/// POST /v1/workflows - Create a workflow
#[utoipa::path(
    post,
    path = "/v1/workflows",
    request_body = CreateWorkflowRequest,
    responses(
        (status = 201, description = "Workflow created", body = WorkflowDefinition),
        (status = 400, description = "Invalid workflow", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowDefinition>), ApiError> {
    let workflow = req.into_definition();
    state
        .engine
        .save_workflow(&workflow)
        .await
        .map_err(|e| engine_error("create workflow", e))?;

    Ok((StatusCode::CREATED, Json(workflow)))
}

/// GET /v1/workflows/{workflow_id} - Get a workflow
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}",
    params(
        ("workflow_id" = Uuid, Path, description = "Workflow ID")
    ),
    responses(
        (status = 200, description = "Workflow found", body = WorkflowDefinition),
        (status = 404, description = "Workflow not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Result<Json<WorkflowDefinition>, ApiError> {
    let workflow = state
        .engine
        .get_workflow(workflow_id)
        .await
        .map_err(|e| engine_error("get workflow", e))?;
    Ok(Json(workflow))
}

/// GET /v1/businesses/{business_id}/routes - Workflows an intent would start
#[utoipa::path(
    get,
    path = "/v1/businesses/{business_id}/routes",
    params(
        ("business_id" = String, Path, description = "Business ID"),
        RoutesQuery
    ),
    responses(
        (status = 200, description = "Resolved workflows in trigger order", body = ListResponse<WorkflowDefinition>),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn resolve_routes(
    State(state): State<AppState>,
    Path(business_id): Path<String>,
    Query(query): Query<RoutesQuery>,
) -> Result<Json<ListResponse<WorkflowDefinition>>, ApiError> {
    let workflows = state
        .engine
        .resolve(&business_id, &query.intent)
        .await
        .map_err(|e| engine_error("resolve routes", e))?;
    Ok(Json(ListResponse::new(workflows)))
}
