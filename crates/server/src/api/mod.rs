// HTTP API routes
//
// Each submodule handles one resource and exposes `routes(state)`.
// All of them share the engine through AppState.

pub mod common;
pub mod events;
pub mod runs;
pub mod scheduler;
pub mod settings;
pub mod workflows;

use std::sync::Arc;

use axum::Router;
use flowline_engine::AutomationEngine;

// Re-export common types
pub use common::{ErrorResponse, ListResponse};

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AutomationEngine>,
}

impl AppState {
    pub fn new(engine: AutomationEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

/// All API routes, unprefixed
pub fn routes(state: AppState) -> Router {
    Router::new()
        .merge(events::routes(state.clone()))
        .merge(workflows::routes(state.clone()))
        .merge(settings::routes(state.clone()))
        .merge(runs::routes(state.clone()))
        .merge(scheduler::routes(state))
}
