//! Notification ledger.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::error::LedgerError;

#[cfg(test)]
#[path = "ledger_tests.rs"]
mod tests;

/// Delivery medium a notification is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Jira,
    Slack,
    Email,
    Sms,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Jira => "jira",
            NotificationType::Slack => "slack",
            NotificationType::Email => "email",
            NotificationType::Sms => "sms",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "jira" => Some(NotificationType::Jira),
            "slack" => Some(NotificationType::Slack),
            "email" => Some(NotificationType::Email),
            "sms" => Some(NotificationType::Sms),
            _ => None,
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    /// Being delivered again after a failure.
    Retry,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Retry => "retry",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(NotificationStatus::Pending),
            "sent" => Some(NotificationStatus::Sent),
            "failed" => Some(NotificationStatus::Failed),
            "retry" => Some(NotificationStatus::Retry),
            _ => None,
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification to record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub notification_type: NotificationType,
    pub recipient: String,
    pub subject: Option<String>,
    pub message: String,
    pub metadata: serde_json::Value,
}

/// A recorded notification.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: i64,
    pub notification_type: NotificationType,
    pub recipient: String,
    pub subject: Option<String>,
    pub message: String,
    pub metadata: serde_json::Value,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

/// One status change of a notification.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub notification_id: i64,
    pub status: NotificationStatus,
    pub timestamp: DateTime<Utc>,
    pub details: Option<String>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    notification_type TEXT NOT NULL,
    recipient TEXT NOT NULL,
    subject TEXT,
    message TEXT NOT NULL,
    metadata TEXT,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    sent_at TEXT,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS notification_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    notification_id INTEGER NOT NULL REFERENCES notifications(id),
    status TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    details TEXT
);

CREATE INDEX IF NOT EXISTS idx_notifications_status ON notifications(status);
CREATE INDEX IF NOT EXISTS idx_history_notification ON notification_history(notification_id);
"#;

const SELECT_COLUMNS: &str = "SELECT id, notification_type, recipient, subject, message, metadata, \
     status, created_at, sent_at, error_message, retry_count FROM notifications";

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn parse_status(idx: usize, value: &str) -> rusqlite::Result<NotificationStatus> {
    NotificationStatus::parse(value)
        .ok_or_else(|| conversion_error(idx, format!("unknown notification status '{}'", value)))
}

fn row_to_notification(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let kind: String = row.get(1)?;
    let notification_type = NotificationType::parse(&kind)
        .ok_or_else(|| conversion_error(1, format!("unknown notification type '{}'", kind)))?;

    let metadata: Option<String> = row.get(5)?;
    let metadata = match metadata {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| conversion_error(5, e.to_string()))?,
        None => serde_json::Value::Null,
    };

    let status: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let sent_at: Option<String> = row.get(8)?;

    Ok(Notification {
        id: row.get(0)?,
        notification_type,
        recipient: row.get(2)?,
        subject: row.get(3)?,
        message: row.get(4)?,
        metadata,
        status: parse_status(6, &status)?,
        created_at: parse_timestamp(7, &created_at)?,
        sent_at: sent_at.as_deref().map(|s| parse_timestamp(8, s)).transpose()?,
        error_message: row.get(9)?,
        retry_count: row.get(10)?,
    })
}

fn row_to_history(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let status: String = row.get(2)?;
    let timestamp: String = row.get(3)?;
    Ok(HistoryEntry {
        id: row.get(0)?,
        notification_id: row.get(1)?,
        status: parse_status(2, &status)?,
        timestamp: parse_timestamp(3, &timestamp)?,
        details: row.get(4)?,
    })
}

/// SQLite-backed notification ledger.
///
/// Every status change is mirrored into `notification_history` in the same
/// transaction.
pub struct NotificationLedger {
    conn: Connection,
}

impl NotificationLedger {
    /// Open (or create) the ledger database.
    pub async fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                LedgerError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(&path).await?;
        Self::init(&conn, busy_timeout).await?;
        debug!("NotificationLedger opened at {:?}", path);
        Ok(Self { conn })
    }

    /// Create a new in-memory ledger.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(&conn, Duration::from_secs(5)).await?;
        Ok(Self { conn })
    }

    async fn init(conn: &Connection, busy_timeout: Duration) -> Result<(), LedgerError> {
        conn.call(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Record a notification as `pending`. Returns its ID.
    pub async fn create(&self, notification: &NewNotification) -> Result<i64, LedgerError> {
        let notification = notification.clone();
        let metadata = serde_json::to_string(&notification.metadata)
            .map_err(|e| LedgerError::InvalidData(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        let id = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO notifications
                     (notification_type, recipient, subject, message, metadata, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        notification.notification_type.as_str(),
                        notification.recipient,
                        notification.subject,
                        notification.message,
                        metadata,
                        NotificationStatus::Pending.as_str(),
                        now,
                    ],
                )?;
                let id = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO notification_history (notification_id, status, timestamp, details)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![id, NotificationStatus::Pending.as_str(), now, "Notification created"],
                )?;
                tx.commit()?;
                Ok(id)
            })
            .await?;

        debug!("Recorded notification {}", id);
        Ok(id)
    }

    /// Change a notification's status.
    ///
    /// `sent` stamps `sent_at`; `failed` stores `error` and increments
    /// `retry_count`. The change is appended to the history.
    pub async fn update_status(
        &self,
        id: i64,
        status: NotificationStatus,
        error: Option<&str>,
    ) -> Result<(), LedgerError> {
        let error = error.map(str::to_string);
        let now = Utc::now().to_rfc3339();

        let updated = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let sent_at = (status == NotificationStatus::Sent).then(|| now.clone());
                let increment = i64::from(status == NotificationStatus::Failed);
                let updated = tx.execute(
                    "UPDATE notifications
                     SET status = ?1, sent_at = ?2, error_message = ?3,
                         retry_count = retry_count + ?4
                     WHERE id = ?5",
                    params![status.as_str(), sent_at, error, increment, id],
                )?;
                if updated > 0 {
                    tx.execute(
                        "INSERT INTO notification_history (notification_id, status, timestamp, details)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            id,
                            status.as_str(),
                            now,
                            error.as_deref().unwrap_or("Status updated")
                        ],
                    )?;
                }
                tx.commit()?;
                Ok(updated)
            })
            .await?;

        if updated == 0 {
            return Err(LedgerError::NotFound(id));
        }
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<Notification>, LedgerError> {
        let notification = self
            .conn
            .call(move |conn| {
                let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);
                Ok(conn.query_row(&sql, [id], row_to_notification).optional()?)
            })
            .await?;
        Ok(notification)
    }

    /// The notification recorded for a queue task, if any.
    pub async fn find_by_task(&self, task_id: &str) -> Result<Option<Notification>, LedgerError> {
        let task_id = task_id.to_string();
        let notification = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "{} WHERE json_extract(metadata, '$.task_id') = ?1 ORDER BY id DESC LIMIT 1",
                    SELECT_COLUMNS
                );
                Ok(conn.query_row(&sql, [task_id], row_to_notification).optional()?)
            })
            .await?;
        Ok(notification)
    }

    /// Notifications with the given status, newest first.
    pub async fn list_by_status(
        &self,
        status: NotificationStatus,
        limit: usize,
    ) -> Result<Vec<Notification>, LedgerError> {
        let notifications = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "{} WHERE status = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
                    SELECT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![status.as_str(), limit as i64], row_to_notification)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(notifications)
    }

    /// All notifications, newest first.
    pub async fn list(&self, limit: usize) -> Result<Vec<Notification>, LedgerError> {
        let notifications = self
            .conn
            .call(move |conn| {
                let sql = format!("{} ORDER BY created_at DESC, id DESC LIMIT ?1", SELECT_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([limit as i64], row_to_notification)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(notifications)
    }

    /// Status history of a notification, oldest first.
    pub async fn history(&self, notification_id: i64) -> Result<Vec<HistoryEntry>, LedgerError> {
        let entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, notification_id, status, timestamp, details
                     FROM notification_history WHERE notification_id = ?1 ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map([notification_id], row_to_history)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(entries)
    }
}
