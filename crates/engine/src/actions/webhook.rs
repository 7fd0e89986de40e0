//! Outbound webhook calls

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::{parse_config, ActionContext, ActionError, ActionHandler, ActionKind, ActionOutcome};

/// Response bodies longer than this are truncated in job results
const MAX_BODY_CHARS: usize = 4096;

fn default_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Deserialize)]
struct WebhookConfig {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    /// Request body; defaults to the run context
    #[serde(default)]
    payload: Option<Value>,
}

/// Calls an HTTP endpoint with a bounded timeout
pub struct WebhookAction {
    client: reqwest::Client,
}

impl WebhookAction {
    pub fn new(timeout: Duration) -> Result<Self, ActionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ActionError::non_retryable(format!("webhook client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
}

#[async_trait]
impl ActionHandler for WebhookAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Webhook
    }

    #[instrument(skip_all, fields(run_id = %ctx.run.id))]
    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        config: &Value,
    ) -> Result<ActionOutcome, ActionError> {
        let config: WebhookConfig = parse_config(config)?;

        let url = reqwest::Url::parse(&config.url)
            .map_err(|e| ActionError::invalid_config(format!("url {:?}: {e}", config.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ActionError::invalid_config(format!(
                "unsupported url scheme {:?}",
                url.scheme()
            )));
        }
        let method = Method::from_bytes(config.method.to_uppercase().as_bytes())
            .map_err(|_| ActionError::invalid_config(format!("method {:?}", config.method)))?;

        let payload = config.payload.unwrap_or_else(|| {
            json!({
                "run_id": ctx.run.id,
                "workflow_id": ctx.run.workflow_id,
                "context": ctx.run.context,
            })
        });

        let mut request = self.client.request(method.clone(), url.clone());
        for (name, value) in &config.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if method != Method::GET {
            request = request.json(&payload);
        }

        let response = request.send().await.map_err(|e| {
            ActionError::retryable(format!("webhook request failed: {e}"))
        })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<Value>(&text)
            .unwrap_or_else(|_| Value::String(text.chars().take(MAX_BODY_CHARS).collect()));

        if !status.is_success() {
            return Err(ActionError {
                message: format!("webhook returned {status}"),
                retryable: is_retryable_status(status),
                details: Some(json!({ "status": status.as_u16(), "body": body })),
            });
        }

        debug!(%url, status = status.as_u16(), "webhook delivered");
        Ok(ActionOutcome::Completed(json!({
            "action": ActionKind::Webhook.as_str(),
            "url": url.as_str(),
            "status": status.as_u16(),
            "response": body,
        })))
    }
}
