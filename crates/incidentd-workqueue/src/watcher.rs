//! Single-consumer watcher loop.
//!
//! The watcher polls the queue for the oldest pending task, resolves its
//! handler by tag and runs it to completion before polling again. Handler
//! failures, panics and timeouts are isolated per cycle; nothing a task does
//! can stop the loop. Only the [`CancellationToken`] ends it, and it is
//! observed between cycles so an in-flight handler always finishes.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{HandlerError, QueueError};
use crate::metrics::WatcherMetrics;
use crate::queue::TaskQueue;
use crate::registry::{HandlerRegistry, TaskContext, TaskHandler};
use crate::task::{TaskRecord, TaskStatus};
use incidentd_config::{AckPolicy, QueueConfig, UnknownTaskPolicy};

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;

/// Where the watcher is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatcherState {
    /// Waiting for or polling the next pending task.
    #[default]
    IdlePolling,
    /// Resolving the handler of a fetched task.
    Dispatching,
    /// A handler is running.
    Handling,
    /// Writing the task's final status.
    MarkingComplete,
}

/// Why a task was dropped without running a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No handler is registered for the tag.
    UnknownTask,
    /// The payload is not a task envelope.
    Malformed,
}

/// What happened to a task after its handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// The task was marked processed before the handler ran.
    AlreadyAcknowledged,
    /// The task stays pending and will be delivered again.
    Redeliver { retry_count: u32 },
    /// Retries are exhausted; the task was moved to `failed`.
    DeadLettered,
}

/// Result of one watcher cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// No pending task.
    Idle,
    /// The handler succeeded and the task is processed.
    Completed { id: Uuid, tag: String },
    /// The task was resolved without running a handler.
    Dropped {
        id: Uuid,
        reason: DropReason,
        status: TaskStatus,
    },
    /// An undecodable row was moved out of `pending` by its sequence number.
    Quarantined { seq: i64, status: TaskStatus },
    /// The task left `pending` before it could be acknowledged.
    Skipped { id: Uuid },
    /// The handler returned an error, panicked or timed out.
    HandlerFailed {
        id: Uuid,
        tag: String,
        error: HandlerError,
        disposition: FailureDisposition,
    },
}

impl CycleOutcome {
    /// Whether the loop should poll again without waiting.
    fn keep_draining(&self) -> bool {
        match self {
            CycleOutcome::Idle => false,
            CycleOutcome::HandlerFailed { disposition, .. } => {
                !matches!(disposition, FailureDisposition::Redeliver { .. })
            }
            _ => true,
        }
    }
}

/// Polling consumer that dispatches tasks to registered handlers.
pub struct Watcher {
    queue: Arc<TaskQueue>,
    registry: Arc<HandlerRegistry>,
    config: QueueConfig,
    state: RwLock<WatcherState>,
    metrics: Arc<WatcherMetrics>,
}

impl Watcher {
    pub fn new(queue: Arc<TaskQueue>, registry: Arc<HandlerRegistry>, config: QueueConfig) -> Self {
        Self {
            queue,
            registry,
            config,
            state: RwLock::new(WatcherState::IdlePolling),
            metrics: Arc::new(WatcherMetrics::new()),
        }
    }

    /// Current state.
    pub fn state(&self) -> WatcherState {
        *self.state.read()
    }

    /// Shared metrics handle.
    pub fn metrics(&self) -> Arc<WatcherMetrics> {
        self.metrics.clone()
    }

    fn set_state(&self, state: WatcherState) {
        *self.state.write() = state;
    }

    /// Run until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Watcher started (poll interval {:?}, {} handlers: {:?})",
            self.config.poll_interval(),
            self.registry.len(),
            self.registry.tags()
        );
        self.metrics.mark_start();
        let notify = self.queue.notifier();

        while !cancel.is_cancelled() {
            let drain = match self.run_once().await {
                Ok(outcome) => outcome.keep_draining(),
                Err(e) => {
                    WatcherMetrics::incr(&self.metrics.storage_errors);
                    error!("Watcher cycle failed: {}", e);
                    false
                }
            };
            self.set_state(WatcherState::IdlePolling);

            if drain {
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = notify.notified() => debug!("Watcher woken by enqueue"),
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        self.set_state(WatcherState::IdlePolling);
        info!("Watcher stopped");
    }

    /// Run a single poll-dispatch-acknowledge cycle.
    ///
    /// Errors are storage errors; handler failures are reported in the outcome.
    pub async fn run_once(&self) -> Result<CycleOutcome, QueueError> {
        WatcherMetrics::incr(&self.metrics.cycles);
        self.set_state(WatcherState::IdlePolling);

        let record = match self.queue.get_first_pending().await {
            Ok(Some(record)) => record,
            Ok(None) => {
                WatcherMetrics::incr(&self.metrics.idle_polls);
                return Ok(CycleOutcome::Idle);
            }
            Err(QueueError::CorruptRecord { seq, reason }) => {
                warn!("Pending record seq {} cannot be decoded: {}", seq, reason);
                return self.quarantine(seq).await;
            }
            Err(e) => return Err(e),
        };

        self.set_state(WatcherState::Dispatching);
        let outcome = self.dispatch(record).await;
        self.set_state(WatcherState::IdlePolling);
        outcome
    }

    async fn dispatch(&self, record: TaskRecord) -> Result<CycleOutcome, QueueError> {
        let envelope = match record.envelope() {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    "Task {} has a malformed payload ({}): {}",
                    record.id,
                    record.digest(),
                    e
                );
                return self.drop_task(&record, DropReason::Malformed).await;
            }
        };

        let Some(entry) = self.registry.get(&envelope.task) else {
            warn!(
                "No handler for task '{}' ({} {})",
                envelope.task,
                record.id,
                record.digest()
            );
            return self.drop_task(&record, DropReason::UnknownTask).await;
        };

        let ctx = TaskContext {
            id: record.id,
            tag: envelope.task,
            data: envelope.data,
            attempt: record.retry_count + 1,
        };
        debug!("Dispatching task {} to '{}' (attempt {})", ctx.id, ctx.tag, ctx.attempt);

        match entry.ack {
            AckPolicy::BeforeExecute => {
                self.set_state(WatcherState::MarkingComplete);
                if !self.queue.set_processed(&ctx.id).await? {
                    debug!("Task {} already acknowledged, skipping handler", ctx.id);
                    return Ok(CycleOutcome::Skipped { id: ctx.id });
                }

                match self.invoke(&entry.handler, &ctx).await {
                    Ok(()) => Ok(self.completed(ctx)),
                    Err(error) => {
                        self.log_failure(&ctx, &record, &error);
                        self.queue.record_failure(&ctx.id, &error.to_string()).await?;
                        Ok(CycleOutcome::HandlerFailed {
                            id: ctx.id,
                            tag: ctx.tag,
                            error,
                            disposition: FailureDisposition::AlreadyAcknowledged,
                        })
                    }
                }
            }
            AckPolicy::AfterExecute => match self.invoke(&entry.handler, &ctx).await {
                Ok(()) => {
                    self.set_state(WatcherState::MarkingComplete);
                    if !self.queue.set_processed(&ctx.id).await? {
                        debug!("Task {} was acknowledged elsewhere", ctx.id);
                    }
                    Ok(self.completed(ctx))
                }
                Err(error) => {
                    self.log_failure(&ctx, &record, &error);
                    self.set_state(WatcherState::MarkingComplete);
                    let disposition = self.settle_failure(&ctx.id, &error).await?;
                    Ok(CycleOutcome::HandlerFailed {
                        id: ctx.id,
                        tag: ctx.tag,
                        error,
                        disposition,
                    })
                }
            },
        }
    }

    async fn invoke(
        &self,
        handler: &Arc<dyn TaskHandler>,
        ctx: &TaskContext,
    ) -> Result<(), HandlerError> {
        self.set_state(WatcherState::Handling);
        let started = Instant::now();

        let fut = AssertUnwindSafe(handler.handle(ctx)).catch_unwind();
        let result = match self.config.handler_timeout() {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Ok(Err(HandlerError::Timeout(limit))),
            },
            None => fut.await,
        };

        self.metrics
            .record_handler_time(started.elapsed().as_micros() as u64);

        match result {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
        }
    }

    fn completed(&self, ctx: TaskContext) -> CycleOutcome {
        WatcherMetrics::incr(&self.metrics.completed);
        debug!("Task {} ('{}') completed", ctx.id, ctx.tag);
        CycleOutcome::Completed {
            id: ctx.id,
            tag: ctx.tag,
        }
    }

    async fn settle_failure(
        &self,
        id: &Uuid,
        error: &HandlerError,
    ) -> Result<FailureDisposition, QueueError> {
        let retry_count = self.queue.record_failure(id, &error.to_string()).await?;
        if retry_count <= self.config.max_retries {
            WatcherMetrics::incr(&self.metrics.redelivered);
            return Ok(FailureDisposition::Redeliver { retry_count });
        }

        self.queue.move_to_dead_letter(id).await?;
        WatcherMetrics::incr(&self.metrics.dead_lettered);
        warn!("Task {} dead-lettered after {} failed attempts", id, retry_count);
        Ok(FailureDisposition::DeadLettered)
    }

    async fn drop_task(
        &self,
        record: &TaskRecord,
        reason: DropReason,
    ) -> Result<CycleOutcome, QueueError> {
        self.set_state(WatcherState::MarkingComplete);
        let status = match self.config.unknown_task_policy {
            UnknownTaskPolicy::Drop => {
                self.queue.set_processed(&record.id).await?;
                TaskStatus::Processed
            }
            UnknownTaskPolicy::DeadLetter => {
                self.queue.move_to_dead_letter(&record.id).await?;
                WatcherMetrics::incr(&self.metrics.dead_lettered);
                TaskStatus::Failed
            }
        };
        WatcherMetrics::incr(&self.metrics.dropped);

        Ok(CycleOutcome::Dropped {
            id: record.id,
            reason,
            status,
        })
    }

    /// Resolve an undecodable head row under the unknown-task policy.
    async fn quarantine(&self, seq: i64) -> Result<CycleOutcome, QueueError> {
        self.set_state(WatcherState::MarkingComplete);
        let status = match self.config.unknown_task_policy {
            UnknownTaskPolicy::Drop => TaskStatus::Processed,
            UnknownTaskPolicy::DeadLetter => {
                WatcherMetrics::incr(&self.metrics.dead_lettered);
                TaskStatus::Failed
            }
        };
        self.queue.quarantine(seq, status).await?;
        WatcherMetrics::incr(&self.metrics.dropped);
        self.set_state(WatcherState::IdlePolling);
        Ok(CycleOutcome::Quarantined { seq, status })
    }

    fn log_failure(&self, ctx: &TaskContext, record: &TaskRecord, error: &HandlerError) {
        WatcherMetrics::incr(&self.metrics.handler_failures);
        error!(
            task_id = %ctx.id,
            tag = %ctx.tag,
            attempt = ctx.attempt,
            digest = %record.digest(),
            "Handler failed: {}",
            error
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
