// OpenAPI specification generation
//
// Served as JSON at /api-doc/openapi.json.

use crate::api;
use crate::api::{ErrorResponse, ListResponse};
use flowline_engine::model::{
    AutomationSettings, EnrollmentPolicy, Event, JobStatus, NewEvent, RunStatus, Step,
    WorkflowDefinition, WorkflowJob, WorkflowRun, WorkflowTrigger,
};
use flowline_engine::{
    DuplicateReason, ProcessResult, SubmitOutcome, TickReport, TriggerOutcome, TriggeredWorkflow,
};
use utoipa::OpenApi;

/// OpenAPI documentation for the Flowline API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::events::submit_event,
        api::events::get_event,
        api::workflows::create_workflow,
        api::workflows::get_workflow,
        api::workflows::resolve_routes,
        api::settings::get_settings,
        api::settings::update_settings,
        api::runs::get_run,
        api::runs::process_run,
        api::scheduler::tick,
    ),
    components(
        schemas(
            Event, NewEvent, SubmitOutcome, DuplicateReason, TriggeredWorkflow, TriggerOutcome,
            WorkflowDefinition, WorkflowTrigger, Step,
            AutomationSettings, EnrollmentPolicy,
            WorkflowRun, WorkflowJob, RunStatus, JobStatus,
            ProcessResult, TickReport,
            api::workflows::CreateWorkflowRequest,
            api::workflows::RoutesQuery,
            api::settings::UpdateSettingsRequest,
            api::runs::RunResponse,
            ListResponse<WorkflowDefinition>,
            ErrorResponse,
        )
    ),
    tags(
        (name = "events", description = "Event ingestion endpoints"),
        (name = "workflows", description = "Workflow definition and routing endpoints"),
        (name = "settings", description = "Business automation settings endpoints"),
        (name = "runs", description = "Workflow run endpoints"),
        (name = "scheduler", description = "Scheduler endpoints")
    ),
    info(
        title = "Flowline API",
        version = "0.1.0",
        description = "API for submitting business events and driving automation workflows",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;
