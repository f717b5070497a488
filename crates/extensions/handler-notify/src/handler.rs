//! `send_notification` handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use incidentd_config::NotifyHandlerConfig;
use incidentd_workqueue::{AckPolicy, HandlerError, TaskContext, TaskHandler};

use crate::channel::{LogChannel, NotificationChannel, WebhookChannel};
use crate::ledger::{NewNotification, NotificationLedger, NotificationStatus, NotificationType};

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;

/// Task tag served by [`NotificationHandler`].
pub const TASK_TAG: &str = "send_notification";

/// Task data of a `send_notification` task.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NotificationRequest {
    #[serde(rename = "notification_type", alias = "type")]
    pub notification_type: NotificationType,
    pub recipient: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
    #[serde(default)]
    pub metadata: Value,
}

impl NotificationRequest {
    /// Parse task data, unwrapping a double-encoded JSON string.
    pub fn from_data(data: &Value) -> Result<Self, HandlerError> {
        let parsed: Self = match data {
            Value::String(raw) => serde_json::from_str(raw),
            other => serde_json::from_value(other.clone()),
        }
        .map_err(|e| HandlerError::InvalidPayload(format!("Invalid notification data: {}", e)))?;

        if parsed.recipient.trim().is_empty() {
            return Err(HandlerError::InvalidPayload("Empty recipient".to_string()));
        }
        if parsed.message.trim().is_empty() {
            return Err(HandlerError::InvalidPayload("Empty message".to_string()));
        }
        Ok(parsed)
    }

    fn into_new(self, task_id: &str) -> NewNotification {
        let mut metadata = match self.metadata {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        metadata.insert("task_id".to_string(), Value::String(task_id.to_string()));

        NewNotification {
            notification_type: self.notification_type,
            recipient: self.recipient,
            subject: self.subject,
            message: self.message,
            metadata: Value::Object(metadata),
        }
    }
}

/// Records notifications in the ledger and delivers them through a channel.
pub struct NotificationHandler {
    ledger: Arc<NotificationLedger>,
    channel: Arc<dyn NotificationChannel>,
}

impl NotificationHandler {
    pub fn new(ledger: Arc<NotificationLedger>, channel: Arc<dyn NotificationChannel>) -> Self {
        Self { ledger, channel }
    }

    /// Build from configuration. `None` when notifications are disabled.
    ///
    /// Uses a [`WebhookChannel`] when a webhook is configured and a
    /// [`LogChannel`] otherwise.
    pub async fn from_config(
        config: &NotifyHandlerConfig,
        busy_timeout: Duration,
    ) -> Result<Option<Self>, HandlerError> {
        if !config.enabled {
            return Ok(None);
        }

        let ledger = NotificationLedger::open(config.resolved_ledger_path(), busy_timeout).await?;
        let channel: Arc<dyn NotificationChannel> = match &config.webhook_url {
            Some(url) => Arc::new(WebhookChannel::new(
                url.clone(),
                Duration::from_secs(config.timeout_secs),
            )?),
            None => Arc::new(LogChannel),
        };
        Ok(Some(Self::new(Arc::new(ledger), channel)))
    }

    pub fn ledger(&self) -> &Arc<NotificationLedger> {
        &self.ledger
    }

    pub fn channel_name(&self) -> &str {
        self.channel.name()
    }
}

#[async_trait]
impl TaskHandler for NotificationHandler {
    async fn handle(&self, ctx: &TaskContext) -> Result<(), HandlerError> {
        let request = NotificationRequest::from_data(&ctx.data)?;
        let task_id = ctx.id.to_string();

        // A redelivered task reuses the notification recorded on its first attempt.
        let id = match self.ledger.find_by_task(&task_id).await? {
            Some(existing) if existing.status == NotificationStatus::Sent => {
                info!("Notification {} for task {} already sent", existing.id, task_id);
                return Ok(());
            }
            Some(existing) => {
                self.ledger
                    .update_status(existing.id, NotificationStatus::Retry, None)
                    .await?;
                existing.id
            }
            None => self.ledger.create(&request.into_new(&task_id)).await?,
        };

        let notification = self
            .ledger
            .get(id)
            .await?
            .ok_or_else(|| HandlerError::NotFound(format!("notification {}", id)))?;

        match self.channel.send(&notification).await {
            Ok(()) => {
                self.ledger
                    .update_status(id, NotificationStatus::Sent, None)
                    .await?;
                info!(
                    "Sent {} notification {} to {} via {}",
                    notification.notification_type,
                    id,
                    notification.recipient,
                    self.channel.name()
                );
                Ok(())
            }
            Err(e) => {
                warn!("Notification {} failed via {}: {}", id, self.channel.name(), e);
                self.ledger
                    .update_status(id, NotificationStatus::Failed, Some(&e.to_string()))
                    .await?;
                Err(e)
            }
        }
    }

    fn default_ack_policy(&self) -> AckPolicy {
        AckPolicy::AfterExecute
    }
}
