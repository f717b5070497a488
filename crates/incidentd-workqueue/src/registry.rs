//! Handler registry: maps task tags to handlers.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{HandlerError, QueueError};
use incidentd_config::AckPolicy;

/// What a handler sees of a dispatched task.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Task record ID.
    pub id: Uuid,
    /// Task tag the handler was selected by.
    pub tag: String,
    /// The envelope's `data` member.
    pub data: serde_json::Value,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u32,
}

/// Task handler trait.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute a task.
    async fn handle(&self, ctx: &TaskContext) -> Result<(), HandlerError>;

    /// Acknowledgement policy used unless the registration overrides it.
    fn default_ack_policy(&self) -> AckPolicy {
        AckPolicy::AfterExecute
    }
}

/// A registered handler with its effective acknowledgement policy.
#[derive(Clone)]
pub struct RegisteredHandler {
    pub handler: Arc<dyn TaskHandler>,
    pub ack: AckPolicy,
}

/// Tag to handler mapping, consulted by the watcher on every dispatch.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, RegisteredHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its default acknowledgement policy.
    pub fn register(
        &mut self,
        tag: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), QueueError> {
        let ack = handler.default_ack_policy();
        self.register_with_policy(tag, handler, ack)
    }

    /// Register a handler with an explicit acknowledgement policy.
    pub fn register_with_policy(
        &mut self,
        tag: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        ack: AckPolicy,
    ) -> Result<(), QueueError> {
        let tag = tag.into();
        if self.handlers.contains_key(&tag) {
            return Err(QueueError::AlreadyRegistered(tag));
        }
        debug!("Registered handler '{}' ({:?})", tag, ack);
        self.handlers.insert(tag, RegisteredHandler { handler, ack });
        Ok(())
    }

    /// Change the acknowledgement policy of a registered handler.
    ///
    /// Returns `false` if no handler is registered under `tag`.
    pub fn set_ack_policy(&mut self, tag: &str, ack: AckPolicy) -> bool {
        match self.handlers.get_mut(tag) {
            Some(entry) => {
                entry.ack = ack;
                true
            }
            None => false,
        }
    }

    /// Apply per-tag policy overrides from configuration.
    pub fn apply_overrides(&mut self, overrides: &HashMap<String, AckPolicy>) {
        for (tag, ack) in overrides {
            if !self.set_ack_policy(tag, *ack) {
                warn!("Ack policy configured for unregistered task '{}'", tag);
            }
        }
    }

    pub fn get(&self, tag: &str) -> Option<&RegisteredHandler> {
        self.handlers.get(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Handler built from an async closure.
pub struct FnHandler<F, Fut> {
    f: F,
    ack: AckPolicy,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut> {
    /// Override the default acknowledgement policy.
    pub fn with_ack_policy(mut self, ack: AckPolicy) -> Self {
        self.ack = ack;
        self
    }
}

/// Wrap an async closure as a [`TaskHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler {
        f,
        ack: AckPolicy::AfterExecute,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: &TaskContext) -> Result<(), HandlerError> {
        (self.f)(ctx.clone()).await
    }

    fn default_ack_policy(&self) -> AckPolicy {
        self.ack
    }
}
