//! Notification delivery channels.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use incidentd_workqueue::HandlerError;

use crate::ledger::Notification;

/// Delivers a recorded notification.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name for logs.
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<(), HandlerError>;
}

/// Posts notifications to a webhook.
///
/// The body carries a Slack-compatible `text` field plus the structured
/// notification.
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, HandlerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HandlerError::Downstream(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

fn render_text(notification: &Notification) -> String {
    match &notification.subject {
        Some(subject) => format!("*{}*\n{}", subject, notification.message),
        None => notification.message.clone(),
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<(), HandlerError> {
        let payload = json!({
            "text": render_text(notification),
            "notification_id": notification.id,
            "type": notification.notification_type,
            "recipient": notification.recipient,
            "subject": notification.subject,
            "message": notification.message,
            "metadata": notification.metadata,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| HandlerError::Downstream(format!("Failed to send notification: {}", e)))?;

        if !response.status().is_success() {
            return Err(HandlerError::Downstream(format!(
                "Webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Writes notifications to the log without delivering them.
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<(), HandlerError> {
        info!(
            notification_id = notification.id,
            kind = %notification.notification_type,
            recipient = %notification.recipient,
            "{}",
            render_text(notification)
        );
        Ok(())
    }
}
