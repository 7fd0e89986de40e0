//! Email delivery

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{parse_config, ActionContext, ActionError, ActionHandler, ActionKind, ActionOutcome};

/// A rendered email ready for delivery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

/// Outbound email provider
#[async_trait]
pub trait EmailTransport: Send + Sync + 'static {
    /// Deliver a message, returning the provider's message id
    async fn send(&self, message: &EmailMessage) -> Result<String, ActionError>;
}

/// Email provider reached over an HTTP JSON API
pub struct HttpEmailTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    default_from: String,
}

impl HttpEmailTransport {
    pub fn new(
        endpoint: impl Into<String>,
        default_from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ActionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ActionError::non_retryable(format!("email client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
            default_from: default_from.into(),
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    #[instrument(skip(self, message), fields(to = %message.to))]
    async fn send(&self, message: &EmailMessage) -> Result<String, ActionError> {
        let mut body = serde_json::to_value(message)
            .map_err(|e| ActionError::non_retryable(e.to_string()))?;
        if message.from.is_none() {
            body["from"] = json!(self.default_from);
        }

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ActionError::retryable(format!("email provider unreachable: {e}")))?;

        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let error = ActionError {
                message: format!("email provider returned {status}"),
                retryable: status.is_server_error() || status.as_u16() == 429,
                details: Some(payload),
            };
            return Err(error);
        }

        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        debug!(message_id = %id, "email accepted");
        Ok(id)
    }
}

/// Transport that keeps messages in memory
#[derive(Default)]
pub struct RecordingEmailTransport {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingEmailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl EmailTransport for RecordingEmailTransport {
    async fn send(&self, message: &EmailMessage) -> Result<String, ActionError> {
        self.sent.lock().push(message.clone());
        Ok(Uuid::now_v7().to_string())
    }
}

/// Sends an email; `to` and `subject` are required
pub struct SendEmailAction {
    transport: Arc<dyn EmailTransport>,
}

impl SendEmailAction {
    pub fn new(transport: Arc<dyn EmailTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ActionHandler for SendEmailAction {
    fn kind(&self) -> ActionKind {
        ActionKind::SendEmail
    }

    async fn execute(
        &self,
        _ctx: &ActionContext<'_>,
        config: &Value,
    ) -> Result<ActionOutcome, ActionError> {
        let message: EmailMessage = parse_config(config)?;
        if !message.to.contains('@') {
            return Err(ActionError::invalid_config(format!(
                "recipient {:?} is not an address",
                message.to
            )));
        }
        if message.subject.trim().is_empty() {
            return Err(ActionError::invalid_config("subject must not be empty"));
        }

        let message_id = self.transport.send(&message).await?;

        Ok(ActionOutcome::Completed(json!({
            "action": ActionKind::SendEmail.as_str(),
            "message_id": message_id,
            "to": message.to,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing;
    use crate::persistence::InMemoryAutomationStore;
    use chrono::Utc;

    #[tokio::test]
    async fn test_send_email_uses_transport() {
        let transport = Arc::new(RecordingEmailTransport::new());
        let action = SendEmailAction::new(transport.clone());
        let store = InMemoryAutomationStore::new();
        let run = testing::run(json!({}));
        let job = testing::job(&run, ActionKind::SendEmail);
        let scope = json!({});
        let ctx = ActionContext {
            store: &store,
            run: &run,
            job: &job,
            scope: &scope,
            now: Utc::now(),
        };

        let outcome = action
            .execute(&ctx, &json!({"to": "ada@example.com", "subject": "Welcome", "body": "Hi"}))
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::Completed(ref r) if r["to"] == "ada@example.com"));

        let err = action
            .execute(&ctx, &json!({"to": "nobody", "subject": "Welcome"}))
            .await
            .unwrap_err();
        assert!(!err.retryable);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Welcome");
    }
}
