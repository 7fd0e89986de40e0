// Flowline API server
// Decision: in-memory store when DATABASE_URL is unset, so the server runs
// without infrastructure for local development

mod api;
mod config;
mod email;
mod openapi;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::{routing::get, Json, Router};
use chrono::Utc;
use flowline_engine::actions::{EmailTransport, HttpEmailTransport};
use flowline_engine::{
    AutomationEngine, AutomationStore, InMemoryAutomationStore, PostgresAutomationStore,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::email::LoggingEmailTransport;
use crate::openapi::ApiDoc;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_telemetry();

    tracing::info!("flowline-server starting...");

    let config = ServerConfig::from_env();

    let store: Arc<dyn AutomationStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresAutomationStore::connect(url, config.max_connections)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Connected to database");
            if config.run_migrations {
                store.migrate().await.context("Failed to run migrations")?;
                tracing::info!("Migrations applied");
            }
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store (data is lost on restart)");
            Arc::new(InMemoryAutomationStore::new())
        }
    };

    let email: Arc<dyn EmailTransport> = match &config.email {
        Some(email) => {
            let mut transport = HttpEmailTransport::new(
                &email.endpoint,
                &email.default_from,
                config.engine.webhook_timeout,
            )
            .map_err(|e| anyhow::anyhow!("Failed to create email transport: {}", e))?;
            if let Some(key) = &email.api_key {
                transport = transport.with_api_key(key);
            }
            tracing::info!(endpoint = %email.endpoint, "Email provider configured");
            Arc::new(transport)
        }
        None => {
            tracing::info!("Email provider not configured (EMAIL_API_URL not set), emails are logged only");
            Arc::new(LoggingEmailTransport)
        }
    };

    let engine = AutomationEngine::with_default_actions(store, email, &config.engine)
        .context("Failed to create automation engine")?;
    let state = AppState::new(engine);

    if !config.api_prefix.is_empty() {
        tracing::info!(prefix = %config.api_prefix, "API prefix configured");
    }
    if config.cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
    } else {
        tracing::info!(origins = ?config.cors_origins, "CORS origins configured");
    }

    let app = build_app(state.clone(), &config.api_prefix, config.cors_origins.clone());

    if let Some(interval) = config.scheduler_interval {
        tracing::info!(interval_secs = interval.as_secs(), "Starting scheduler loop");
        tokio::spawn(run_scheduler(state, interval));
    } else {
        tracing::info!("Scheduler loop disabled, use POST /v1/scheduler/tick");
    }

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("flowline-server stopped");
    Ok(())
}

/// Tick the scheduler forever
async fn run_scheduler(state: AppState, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(e) = state.engine.tick(Utc::now()).await {
            tracing::error!("Scheduler tick failed: {}", e);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}

/// Full application router: health, OpenAPI document and prefixed API routes
fn build_app(state: AppState, api_prefix: &str, cors_origins: Vec<HeaderValue>) -> Router {
    let app = Router::new()
        .route("/health", get(health))
        .route(
            "/api-doc/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .merge(build_router_with_prefix(api::routes(state), api_prefix));

    // Add CORS layer only if origins are configured
    let app = if !cors_origins.is_empty() {
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN]),
        )
    } else {
        app
    };

    app.layer(TraceLayer::new_for_http())
}

/// Build router with optional API prefix (extracted for testing)
fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use flowline_engine::actions::RecordingEmailTransport;
    use flowline_engine::EngineConfig;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_app(prefix: &str) -> (Router, Arc<RecordingEmailTransport>) {
        let store: Arc<dyn AutomationStore> = Arc::new(InMemoryAutomationStore::new());
        let email = Arc::new(RecordingEmailTransport::new());
        let engine =
            AutomationEngine::with_default_actions(store, email.clone(), &EngineConfig::default())
                .unwrap();
        (build_app(AppState::new(engine), prefix, vec![]), email)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn test_routes() -> Router {
        Router::new().route("/v1/test", get(|| async { "ok" }))
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = test_app("");
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_submit_event_then_duplicate() {
        let (app, _) = test_app("");
        let event = json!({
            "business_id": "b1",
            "intent": "contact.submit",
            "dedupe_key": "form-42",
            "payload": {"email": "ada@example.com"}
        });

        let response = app
            .clone()
            .oneshot(json_request("POST", "/v1/events", event.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let accepted = body_json(response).await;
        assert_eq!(accepted["status"], "accepted");

        let response = app
            .oneshot(json_request("POST", "/v1/events", event))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let duplicate = body_json(response).await;
        assert_eq!(duplicate["status"], "duplicate");
        assert_eq!(duplicate["event_id"], accepted["event_id"]);
    }

    #[tokio::test]
    async fn test_submit_event_missing_intent_is_bad_request() {
        let (app, _) = test_app("");
        let response = app
            .oneshot(json_request(
                "POST",
                "/v1/events",
                json!({"business_id": "b1", "intent": ""}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_event_runs_workflow_inline() {
        let (app, email) = test_app("");
        let workflow = json!({
            "name": "Welcome",
            "business_id": "b1",
            "trigger": {"type": "event", "intents": ["contact.submit"]},
            "steps": [{
                "action_type": "send_email",
                "config": {"to": "{{event.payload.email}}", "subject": "Hi"}
            }]
        });
        let response = app
            .clone()
            .oneshot(json_request("POST", "/v1/workflows", workflow))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/businesses/b1/routes?intent=contact.submit")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"].as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/v1/events",
                json!({
                    "business_id": "b1",
                    "intent": "contact.submit",
                    "payload": {"email": "ada@example.com"}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["runs"][0]["outcome"], "triggered");
        let run_id = body["runs"][0]["run_id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/runs/{run_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let run = body_json(response).await;
        assert_eq!(run["status"], "completed");
        assert_eq!(run["jobs"].as_array().unwrap().len(), 1);

        let sent = email.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ada@example.com");
    }

    #[tokio::test]
    async fn test_missing_run_is_not_found() {
        let (app, _) = test_app("");
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/runs/{}", uuid::Uuid::now_v7()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_workflow_is_bad_request() {
        let (app, _) = test_app("");
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/v1/workflows",
                json!({"name": "", "business_id": "b1", "trigger": {"type": "event", "intents": ["x"]}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(json_request(
                "POST",
                "/v1/workflows",
                json!({"name": "Digest", "business_id": "b1", "trigger": {"type": "schedule", "cron": "0 9 * * *"}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_settings_patch_and_get() {
        let (app, _) = test_app("");
        let response = app
            .clone()
            .oneshot(json_request(
                "PATCH",
                "/v1/businesses/b1/settings",
                json!({"automations_enabled": false, "enrollment_policy": {"type": "once"}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/businesses/b1/settings")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let settings = body_json(response).await;
        assert_eq!(settings["automations_enabled"], false);
        assert_eq!(settings["enrollment_policy"]["type"], "once");
    }

    #[tokio::test]
    async fn test_scheduler_tick_endpoint() {
        let (app, _) = test_app("");
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/scheduler/tick")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["created_runs"], json!([]));
    }

    #[tokio::test]
    async fn test_api_prefix_set() {
        let app = build_router_with_prefix(test_routes(), "/api");

        // Route should work with prefix
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        // Route should NOT work without prefix
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_openapi_document_served() {
        let (app, _) = test_app("/api");
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api-doc/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let doc = body_json(response).await;
        assert!(doc["paths"]["/v1/events"].is_object());
    }
}
