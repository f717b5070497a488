//! Queue and handler errors.

use std::time::Duration;

use thiserror::Error;

/// Queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Task not found.
    #[error("Task not found: {0}")]
    NotFound(String),

    /// Persistence layer unreachable or constraint violated.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Stored payload is not a valid task envelope.
    #[error("Failed to deserialize task payload: {0}")]
    Deserialization(String),

    /// A pending row could not be decoded into a task record.
    #[error("Undecodable task record at seq {seq}: {reason}")]
    CorruptRecord { seq: i64, reason: String },

    /// Payload could not be serialized for storage.
    #[error("Failed to serialize task payload: {0}")]
    Serialization(String),

    /// A handler is already registered for this tag.
    #[error("Handler already registered for task '{0}'")]
    AlreadyRegistered(String),

    /// The producer task was cancelled or panicked.
    #[error("Producer error: {0}")]
    Producer(String),
}

impl From<tokio_rusqlite::Error> for QueueError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        QueueError::Storage(e.to_string())
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        QueueError::Storage(e.to_string())
    }
}

/// Errors raised by task handlers. Caught at the dispatch boundary.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Task data is missing fields the handler needs.
    #[error("Invalid task payload: {0}")]
    InvalidPayload(String),

    /// A record the handler operates on does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Outbound call failed.
    #[error("Downstream call failed: {0}")]
    Downstream(String),

    /// Handler-side persistence failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Handler exceeded the configured timeout.
    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),

    /// Handler panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::NotFound("abc".to_string());
        assert_eq!(err.to_string(), "Task not found: abc");

        let err = QueueError::AlreadyRegistered("llm_invoke".to_string());
        assert!(err.to_string().contains("llm_invoke"));
    }

    #[test]
    fn test_rusqlite_error_is_storage() {
        let err: QueueError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, QueueError::Storage(_)));
    }

    #[test]
    fn test_handler_timeout_display() {
        let err = HandlerError::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "Handler timed out after 5s");
    }
}
