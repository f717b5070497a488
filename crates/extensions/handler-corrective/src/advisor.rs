//! Corrective-action advisors.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use incidentd_workqueue::HandlerError;

/// Produces a corrective action for an incident description.
#[async_trait]
pub trait CorrectiveActionAdvisor: Send + Sync {
    async fn advise(&self, incident: &str) -> Result<String, HandlerError>;
}

#[derive(Debug, Serialize)]
struct AdviceRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct AdviceResponse {
    corrective_action: String,
}

/// Advisor backed by the RAG service's HTTP endpoint.
///
/// POSTs `{"query": "<incident>"}` and expects `{"corrective_action": "..."}`.
pub struct HttpAdvisor {
    url: String,
    client: reqwest::Client,
}

impl HttpAdvisor {
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

#[async_trait]
impl CorrectiveActionAdvisor for HttpAdvisor {
    async fn advise(&self, incident: &str) -> Result<String, HandlerError> {
        debug!("Requesting corrective action from {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&AdviceRequest { query: incident })
            .send()
            .await
            .map_err(|e| HandlerError::Downstream(format!("Advisor unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HandlerError::Downstream(format!(
                "Advisor returned {}: {}",
                status, text
            )));
        }

        let advice: AdviceResponse = response
            .json()
            .await
            .map_err(|e| HandlerError::Downstream(format!("Invalid advisor response: {}", e)))?;

        let action = advice.corrective_action.trim();
        if action.is_empty() {
            return Err(HandlerError::Downstream(
                "Advisor returned an empty corrective action".to_string(),
            ));
        }
        Ok(action.to_string())
    }
}
