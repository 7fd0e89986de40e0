// Email transport used when no provider is configured

use async_trait::async_trait;
use flowline_engine::actions::{EmailMessage, EmailTransport};
use flowline_engine::ActionError;
use uuid::Uuid;

/// Logs outgoing emails instead of delivering them
pub struct LoggingEmailTransport;

#[async_trait]
impl EmailTransport for LoggingEmailTransport {
    async fn send(&self, message: &EmailMessage) -> Result<String, ActionError> {
        let id = Uuid::now_v7().to_string();
        tracing::info!(
            message_id = %id,
            to = %message.to,
            subject = %message.subject,
            "Email provider not configured, email logged only"
        );
        Ok(id)
    }
}
