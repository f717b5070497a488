//! `set_corrective_action` handler.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use incidentd_config::CorrectiveHandlerConfig;
use incidentd_workqueue::{AckPolicy, HandlerError, TaskContext, TaskHandler};

use crate::advisor::{CorrectiveActionAdvisor, HttpAdvisor};
use crate::outputs::ClassifierOutputs;

/// Task tag served by [`CorrectiveActionHandler`].
pub const TASK_TAG: &str = "set_corrective_action";

/// Description used when the task carries no error message.
const NO_DESCRIPTION: &str = "No incident description provided";

/// Task data of a `set_corrective_action` task.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CorrectiveRequest {
    /// Classifier output the action belongs to. Producers send strings or numbers.
    #[serde(default)]
    payload_id: Option<Value>,
    #[serde(default)]
    error_message: Option<String>,
}

impl CorrectiveRequest {
    /// Parse task data, unwrapping a double-encoded JSON string.
    pub fn from_data(data: &Value) -> Result<Self, HandlerError> {
        let parsed = match data {
            Value::String(raw) => serde_json::from_str(raw),
            other => serde_json::from_value(other.clone()),
        };
        parsed.map_err(|e| HandlerError::InvalidPayload(format!("Invalid corrective action data: {}", e)))
    }

    /// The payload id as text.
    pub fn payload_id(&self) -> Result<String, HandlerError> {
        let id = match &self.payload_id {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        if id.is_empty() {
            return Err(HandlerError::InvalidPayload("Missing payload_id".to_string()));
        }
        Ok(id)
    }

    /// Incident description passed to the advisor.
    pub fn description(&self) -> &str {
        match self.error_message.as_deref().map(str::trim) {
            Some(message) if !message.is_empty() => message,
            _ => NO_DESCRIPTION,
        }
    }
}

/// Generates a corrective action and stores it on the classifier output.
pub struct CorrectiveActionHandler {
    advisor: Arc<dyn CorrectiveActionAdvisor>,
    outputs: ClassifierOutputs,
}

impl CorrectiveActionHandler {
    pub fn new(advisor: Arc<dyn CorrectiveActionAdvisor>, outputs: ClassifierOutputs) -> Self {
        Self { advisor, outputs }
    }

    /// Build from configuration. `None` when no advisor is configured.
    ///
    /// `classifier_outputs` lives in `default_db` unless the config names
    /// another database.
    pub async fn from_config(
        config: &CorrectiveHandlerConfig,
        default_db: &Path,
        busy_timeout: Duration,
    ) -> Result<Option<Self>, HandlerError> {
        let Some(url) = &config.advisor_url else {
            return Ok(None);
        };
        let advisor = HttpAdvisor::new(url.clone(), Duration::from_secs(config.timeout_secs))?;
        let path = config
            .resolved_database_path()
            .unwrap_or_else(|| default_db.to_path_buf());
        let outputs = ClassifierOutputs::open(path, busy_timeout).await?;
        Ok(Some(Self::new(Arc::new(advisor), outputs)))
    }
}

#[async_trait]
impl TaskHandler for CorrectiveActionHandler {
    async fn handle(&self, ctx: &TaskContext) -> Result<(), HandlerError> {
        let request = CorrectiveRequest::from_data(&ctx.data)?;
        let payload_id = request.payload_id()?;

        let action = self.advisor.advise(request.description()).await?;

        let updated = self
            .outputs
            .set_corrective_action(&payload_id, &action, Utc::now())
            .await?;
        if updated == 0 {
            return Err(HandlerError::NotFound(format!(
                "No classifier output with payload_id {}",
                payload_id
            )));
        }

        info!("Stored corrective action for payload {} (task {})", payload_id, ctx.id);
        Ok(())
    }

    /// Corrective actions are acknowledged before they run; a failed
    /// generation is not retried.
    fn default_ack_policy(&self) -> AckPolicy {
        AckPolicy::BeforeExecute
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
