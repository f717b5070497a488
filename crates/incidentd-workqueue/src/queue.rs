//! Queue accessor: typed operations over a task store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::store::{MemoryTaskStore, TaskStore};
use crate::task::{TaskEnvelope, TaskRecord, TaskStatus};

/// Typed access to the task record store.
///
/// Producers and the watcher share one `TaskQueue` (behind an `Arc`); nothing
/// else touches the store directly.
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    notify: Arc<Notify>,
}

impl TaskQueue {
    /// Create a queue over the given store.
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a queue backed by a [`MemoryTaskStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTaskStore::new()))
    }

    /// Serialize a payload and append it as a pending task.
    pub async fn enqueue<T: Serialize + ?Sized>(&self, payload: &T) -> Result<Uuid, QueueError> {
        let data = serde_json::to_string(payload)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        let record = TaskRecord::new(data);

        self.store.insert(&record).await?;
        debug!("Enqueued task {}", record.id);

        self.notify.notify_one();
        Ok(record.id)
    }

    /// Append a task envelope.
    pub async fn enqueue_task(&self, task: &TaskEnvelope) -> Result<Uuid, QueueError> {
        self.enqueue(task).await
    }

    /// The oldest pending task.
    pub async fn get_first_pending(&self) -> Result<Option<TaskRecord>, QueueError> {
        self.store.select_first_pending().await
    }

    /// Mark a task processed. Returns `false` if it had already left `pending`.
    pub async fn set_processed(&self, id: &Uuid) -> Result<bool, QueueError> {
        self.transition(id, TaskStatus::Processed).await
    }

    /// Move a task to the dead letter status.
    pub async fn move_to_dead_letter(&self, id: &Uuid) -> Result<bool, QueueError> {
        let moved = self.transition(id, TaskStatus::Failed).await?;
        if moved {
            info!("Moved task {} to dead letter", id);
        }
        Ok(moved)
    }

    async fn transition(&self, id: &Uuid, status: TaskStatus) -> Result<bool, QueueError> {
        let changed = self.store.update_status(id, status, Utc::now()).await?;
        if !changed {
            debug!("Task {} already left pending, {} is a no-op", id, status);
        }
        Ok(changed)
    }

    /// Move an undecodable pending row, addressed by `seq`, to `status`.
    pub async fn quarantine(&self, seq: i64, status: TaskStatus) -> Result<bool, QueueError> {
        let moved = self.store.quarantine(seq, status, Utc::now()).await?;
        if moved {
            warn!("Moved undecodable record seq {} to {}", seq, status);
        }
        Ok(moved)
    }

    /// Record a failed attempt. Returns the new retry count.
    pub async fn record_failure(&self, id: &Uuid, error: &str) -> Result<u32, QueueError> {
        let count = self.store.record_failure(id, error).await?;
        warn!("Task {} failed (attempt {}): {}", id, count, error);
        Ok(count)
    }

    /// Load a task by ID.
    pub async fn get(&self, id: &Uuid) -> Result<Option<TaskRecord>, QueueError> {
        self.store.get(id).await
    }

    /// Tasks with the given status in insertion order.
    pub async fn list(&self, status: TaskStatus, limit: usize) -> Result<Vec<TaskRecord>, QueueError> {
        self.store.list_by_status(status, limit).await
    }

    /// Task counts per status.
    pub async fn get_stats(&self) -> Result<BTreeMap<TaskStatus, u64>, QueueError> {
        self.store.count_by_status().await
    }

    /// Signalled after every successful enqueue through this queue.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_enqueue_and_get_first_pending() {
        let queue = TaskQueue::in_memory();
        let task = TaskEnvelope::new("llm_invoke", json!({"incident": 7}));

        let id = queue.enqueue_task(&task).await.unwrap();

        let head = queue.get_first_pending().await.unwrap().unwrap();
        assert_eq!(head.id, id);
        assert_eq!(head.envelope().unwrap(), task);
    }

    #[tokio::test]
    async fn test_enqueue_arbitrary_payload() {
        let queue = TaskQueue::in_memory();
        let id = queue
            .enqueue(&json!({"task": "set_corrective_action", "data": {"payload_id": "X1"}}))
            .await
            .unwrap();

        let record = queue.get(&id).await.unwrap().unwrap();
        let envelope = record.envelope().unwrap();
        assert_eq!(envelope.task, "set_corrective_action");
        assert_eq!(envelope.data["payload_id"], "X1");
    }

    #[tokio::test]
    async fn test_fifo_among_pending() {
        let queue = TaskQueue::in_memory();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(
                queue
                    .enqueue_task(&TaskEnvelope::new(format!("t{}", i), json!({})))
                    .await
                    .unwrap(),
            );
        }

        for id in &ids {
            let head = queue.get_first_pending().await.unwrap().unwrap();
            assert_eq!(&head.id, id);
            queue.set_processed(id).await.unwrap();
        }
        assert!(queue.get_first_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_processed_twice() {
        let queue = TaskQueue::in_memory();
        let id = queue.enqueue(&json!({"task": "a"})).await.unwrap();

        assert!(queue.set_processed(&id).await.unwrap());
        let first = queue.get(&id).await.unwrap().unwrap();

        assert!(!queue.set_processed(&id).await.unwrap());
        let second = queue.get(&id).await.unwrap().unwrap();

        assert_eq!(second.status, TaskStatus::Processed);
        assert_eq!(first.processed_at, second.processed_at);
    }

    #[tokio::test]
    async fn test_set_processed_unknown_id() {
        let queue = TaskQueue::in_memory();
        let result = queue.set_processed(&Uuid::new_v4()).await;
        assert!(matches!(result, Err(QueueError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_stats_consistency() {
        let queue = TaskQueue::in_memory();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(queue.enqueue(&json!({"task": format!("t{}", i)})).await.unwrap());
        }
        queue.set_processed(&ids[0]).await.unwrap();
        queue.set_processed(&ids[1]).await.unwrap();

        let stats = queue.get_stats().await.unwrap();
        let expected: BTreeMap<_, _> =
            [(TaskStatus::Pending, 3), (TaskStatus::Processed, 2)].into_iter().collect();
        assert_eq!(stats, expected);
    }

    #[tokio::test]
    async fn test_dead_letter_and_list() {
        let queue = TaskQueue::in_memory();
        let id = queue.enqueue(&json!({"task": "a"})).await.unwrap();

        assert_eq!(queue.record_failure(&id, "boom").await.unwrap(), 1);
        assert!(queue.move_to_dead_letter(&id).await.unwrap());

        let failed = queue.list(TaskStatus::Failed, 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("boom"));
        assert!(queue.get_first_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_signals_notifier() {
        let queue = TaskQueue::in_memory();
        let notify = queue.notifier();

        queue.enqueue(&json!({"task": "a"})).await.unwrap();

        // The permit stored by notify_one completes the next wait immediately.
        tokio::time::timeout(std::time::Duration::from_millis(100), notify.notified())
            .await
            .unwrap();
    }
}
