//! # incidentd Work Queue
//!
//! Durable job queue that decouples dashboard actions from asynchronous
//! processing (LLM invocation, corrective-action generation, notifications).
//!
//! ## Features
//!
//! - Task records persisted in SQLite, dispatched in insertion order
//! - Batch producer with per-task outcome reporting
//! - Single-consumer polling watcher with tag-based handler dispatch
//! - Per-handler acknowledgement policy (ack before or after execution)
//! - Retry bookkeeping and dead-lettering for failing tasks

pub mod error;
pub mod metrics;
pub mod producer;
pub mod queue;
pub mod registry;
pub mod schema;
pub mod store;
pub mod store_sqlite;
pub mod task;
pub mod watcher;

pub use error::{HandlerError, QueueError};
pub use incidentd_config::{AckPolicy, QueueConfig, UnknownTaskPolicy};
pub use metrics::{WatcherMetrics, WatcherMetricsSnapshot};
pub use producer::{BatchPolicy, EnqueueOutcome, Producer, ProducerHandle, ProducerReport, TaskOutcome};
pub use queue::TaskQueue;
pub use registry::{handler_fn, FnHandler, HandlerRegistry, RegisteredHandler, TaskContext, TaskHandler};
pub use store::{MemoryTaskStore, TaskStore};
pub use store_sqlite::SqliteTaskStore;
pub use task::{TaskEnvelope, TaskRecord, TaskStatus};
pub use watcher::{CycleOutcome, DropReason, FailureDisposition, Watcher, WatcherState};

// Re-export CancellationToken for convenience
pub use tokio_util::sync::CancellationToken;
