//! Handler registration for incidentd.

use std::sync::Arc;

use tracing::info;

use incidentd_config::Config;
use incidentd_handler_corrective::CorrectiveActionHandler;
use incidentd_handler_llm::LlmInvokeHandler;
use incidentd_handler_notify::NotificationHandler;
use incidentd_workqueue::HandlerRegistry;

/// Build the handler registry from the `[handlers]` config section.
///
/// Handlers without the settings they need are left out; their tasks then fall
/// under the unknown-task policy.
pub(crate) async fn build_registry(config: &Config) -> anyhow::Result<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    let busy_timeout = config.database.busy_timeout();

    if let Some(handler) = LlmInvokeHandler::from_config(&config.handlers.llm)? {
        info!("llm_invoke forwards to {}", handler.endpoint());
        registry.register(incidentd_handler_llm::TASK_TAG, Arc::new(handler))?;
    }

    let queue_db = config.database.resolved_path();
    if let Some(handler) =
        CorrectiveActionHandler::from_config(&config.handlers.corrective, &queue_db, busy_timeout)
            .await?
    {
        registry.register(incidentd_handler_corrective::TASK_TAG, Arc::new(handler))?;
    }

    if let Some(handler) =
        NotificationHandler::from_config(&config.handlers.notify, busy_timeout).await?
    {
        info!("send_notification delivers via {}", handler.channel_name());
        registry.register(incidentd_handler_notify::TASK_TAG, Arc::new(handler))?;
    }

    registry.apply_overrides(&config.queue.ack_policies);
    Ok(registry)
}
