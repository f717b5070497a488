//! Task record persistence.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::QueueError;
use crate::task::{TaskRecord, TaskStatus};

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

/// Task record store.
///
/// Records are never deleted. A record leaves `pending` at most once; the
/// store assigns `seq` on insert and "first pending" means lowest `seq`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new record. Fails on duplicate ID.
    async fn insert(&self, record: &TaskRecord) -> Result<(), QueueError>;

    /// The oldest pending record, if any.
    ///
    /// Fails with [`QueueError::CorruptRecord`] when that row cannot be
    /// decoded; [`TaskStore::quarantine`] moves it out of the way.
    async fn select_first_pending(&self) -> Result<Option<TaskRecord>, QueueError>;

    /// Move a pending record to `status`, stamping `processed_at`.
    ///
    /// Returns `false` without touching the record if it already left `pending`.
    async fn update_status(
        &self,
        id: &Uuid,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, QueueError>;

    /// Move a pending record to `status` by its insertion sequence.
    ///
    /// Used for rows whose ID cannot be read. Returns `false` if no pending
    /// record has that `seq`.
    async fn quarantine(
        &self,
        seq: i64,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, QueueError>;

    /// Increment the retry count and remember the error. Returns the new count.
    async fn record_failure(&self, id: &Uuid, error: &str) -> Result<u32, QueueError>;

    /// Load a record by ID.
    async fn get(&self, id: &Uuid) -> Result<Option<TaskRecord>, QueueError>;

    /// Records with the given status in insertion order.
    async fn list_by_status(
        &self,
        status: TaskStatus,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, QueueError>;

    /// Record count per status. Statuses with no records are absent.
    async fn count_by_status(&self) -> Result<BTreeMap<TaskStatus, u64>, QueueError>;
}

/// In-memory task store for tests and ephemeral runs.
pub struct MemoryTaskStore {
    records: RwLock<Vec<TaskRecord>>,
}

impl MemoryTaskStore {
    /// Create a new memory store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, record: &TaskRecord) -> Result<(), QueueError> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id == record.id) {
            return Err(QueueError::Storage(format!(
                "UNIQUE constraint failed: queue.id ({})",
                record.id
            )));
        }
        let mut record = record.clone();
        record.seq = records.last().map_or(1, |r| r.seq + 1);
        records.push(record);
        Ok(())
    }

    async fn select_first_pending(&self) -> Result<Option<TaskRecord>, QueueError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.is_pending()).cloned())
    }

    async fn update_status(
        &self,
        id: &Uuid,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == *id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        if !record.is_pending() {
            return Ok(false);
        }
        record.status = status;
        record.processed_at = Some(at);
        Ok(true)
    }

    async fn quarantine(
        &self,
        seq: i64,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.seq == seq && r.is_pending()) {
            Some(record) => {
                record.status = status;
                record.processed_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_failure(&self, id: &Uuid, error: &str) -> Result<u32, QueueError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == *id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        record.retry_count += 1;
        record.last_error = Some(error.to_string());
        Ok(record.retry_count)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<TaskRecord>, QueueError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == *id).cloned())
    }

    async fn list_by_status(
        &self,
        status: TaskStatus,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, QueueError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.status == status)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_by_status(&self) -> Result<BTreeMap<TaskStatus, u64>, QueueError> {
        let records = self.records.read().await;
        let mut counts = BTreeMap::new();
        for record in records.iter() {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
