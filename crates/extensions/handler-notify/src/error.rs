//! Notification ledger errors.

use thiserror::Error;

use incidentd_workqueue::HandlerError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Notification not found: {0}")]
    NotFound(i64),

    #[error("Ledger storage error: {0}")]
    Storage(String),

    /// A stored row could not be decoded.
    #[error("Invalid ledger data: {0}")]
    InvalidData(String),
}

impl From<tokio_rusqlite::Error> for LedgerError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

impl From<LedgerError> for HandlerError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(id) => HandlerError::NotFound(format!("notification {}", id)),
            other => HandlerError::Storage(other.to_string()),
        }
    }
}
