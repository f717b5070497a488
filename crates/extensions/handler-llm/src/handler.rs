//! `llm_invoke` handler.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use incidentd_config::LlmHandlerConfig;
use incidentd_workqueue::{AckPolicy, HandlerError, TaskContext, TaskHandler};

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;

/// Task tag served by [`LlmInvokeHandler`].
pub const TASK_TAG: &str = "llm_invoke";

/// Forwards task data to the LLM pipeline.
pub struct LlmInvokeHandler {
    endpoint: String,
    client: reqwest::Client,
}

impl LlmInvokeHandler {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, HandlerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HandlerError::Downstream(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    /// Build from configuration. `None` when no endpoint is configured.
    pub fn from_config(config: &LlmHandlerConfig) -> Result<Option<Self>, HandlerError> {
        match &config.endpoint {
            Some(endpoint) => {
                Self::new(endpoint.clone(), Duration::from_secs(config.timeout_secs)).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Unwrap task data that was serialized twice.
///
/// Some producers store the data member as a JSON string holding the real
/// document; those strings are parsed, anything else passes through.
pub(crate) fn decode_data(data: &Value) -> Value {
    match data {
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(inner @ (Value::Object(_) | Value::Array(_))) => inner,
            _ => data.clone(),
        },
        other => other.clone(),
    }
}

#[async_trait]
impl TaskHandler for LlmInvokeHandler {
    async fn handle(&self, ctx: &TaskContext) -> Result<(), HandlerError> {
        if ctx.data.is_null() {
            return Err(HandlerError::InvalidPayload(
                "llm_invoke requires task data".to_string(),
            ));
        }

        let body = json!({
            "task_id": ctx.id.to_string(),
            "attempt": ctx.attempt,
            "data": decode_data(&ctx.data),
        });
        debug!("Posting task {} to LLM pipeline at {}", ctx.id, self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| HandlerError::Downstream(format!("LLM pipeline unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HandlerError::Downstream(format!(
                "LLM pipeline returned {}: {}",
                status, text
            )));
        }

        info!("LLM pipeline accepted task {} ({})", ctx.id, status);
        Ok(())
    }

    fn default_ack_policy(&self) -> AckPolicy {
        AckPolicy::AfterExecute
    }
}
