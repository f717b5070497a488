//! Task record definition and status.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be dispatched.
    Pending,
    /// Consumed by the watcher.
    Processed,
    /// Dead-lettered after exhausting retries or by the unknown-task policy.
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processed => "processed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "processed" => Some(TaskStatus::Processed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire format of a task: `{"task": "<tag>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Handler discriminator.
    pub task: String,
    /// Opaque handler payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl TaskEnvelope {
    pub fn new(task: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            task: task.into(),
            data,
        }
    }
}

/// A persisted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Store-assigned insertion sequence. Zero until inserted.
    pub seq: i64,
    /// Unique task ID.
    pub id: Uuid,
    /// Serialized payload, opaque to the store.
    pub data: String,
    /// Current status.
    pub status: TaskStatus,
    /// Failed handler attempts so far.
    pub retry_count: u32,
    /// Last handler error.
    pub last_error: Option<String>,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
    /// Time the record left `pending`.
    pub processed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Create a new pending record with a fresh ID.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            seq: 0,
            id: Uuid::new_v4(),
            data: data.into(),
            status: TaskStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// Parse the stored payload into a task envelope.
    pub fn envelope(&self) -> Result<TaskEnvelope, QueueError> {
        serde_json::from_str(&self.data).map_err(|e| QueueError::Deserialization(e.to_string()))
    }

    /// Short fingerprint of the payload for log lines.
    pub fn digest(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.data.hash(&mut hasher);
        format!("{:016x}/{}b", hasher.finish(), self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_new() {
        let record = TaskRecord::new(r#"{"task":"llm_invoke","data":{}}"#);
        assert!(record.is_pending());
        assert_eq!(record.retry_count, 0);
        assert!(record.processed_at.is_none());
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [TaskStatus::Pending, TaskStatus::Processed, TaskStatus::Failed] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("in_review"), None);
    }

    #[test]
    fn test_envelope_parse() {
        let record = TaskRecord::new(r#"{"task":"set_corrective_action","data":{"payload_id":"X1"}}"#);
        let envelope = record.envelope().unwrap();
        assert_eq!(envelope.task, "set_corrective_action");
        assert_eq!(envelope.data, json!({"payload_id": "X1"}));
    }

    #[test]
    fn test_envelope_missing_data_defaults_to_null() {
        let record = TaskRecord::new(r#"{"task":"ping"}"#);
        let envelope = record.envelope().unwrap();
        assert_eq!(envelope.data, serde_json::Value::Null);
    }

    #[test]
    fn test_envelope_malformed() {
        let record = TaskRecord::new("not json");
        assert!(matches!(record.envelope(), Err(QueueError::Deserialization(_))));

        let record = TaskRecord::new(r#"{"data":{}}"#);
        assert!(matches!(record.envelope(), Err(QueueError::Deserialization(_))));
    }

    #[test]
    fn test_digest_is_stable() {
        let a = TaskRecord::new(r#"{"task":"a"}"#);
        let b = TaskRecord::new(r#"{"task":"a"}"#);
        assert_eq!(a.digest(), b.digest());
        assert!(a.digest().ends_with("/12b"));
    }

    #[test]
    fn test_status_ordering_for_stats() {
        assert!(TaskStatus::Pending < TaskStatus::Processed);
        assert!(TaskStatus::Processed < TaskStatus::Failed);
    }
}
