//! SQLite task store.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tokio_rusqlite::Connection;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::schema::init_schema;
use crate::store::TaskStore;
use crate::task::{TaskRecord, TaskStatus};

#[cfg(test)]
#[path = "store_sqlite_tests.rs"]
mod tests;

const SELECT_COLUMNS: &str =
    "SELECT seq, id, data, status, retry_count, last_error, created_at, processed_at FROM queue";

/// SQLite-backed task store.
///
/// All statements of one process go through a single connection, so writes
/// from producers and the watcher in the same process are serialized. Other
/// processes sharing the file are arbitrated by SQLite locking and the busy
/// timeout.
pub struct SqliteTaskStore {
    conn: Connection,
}

impl SqliteTaskStore {
    /// Open (or create) a file-backed queue database.
    pub async fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                QueueError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(&path).await?;
        conn.call(move |conn| Ok(init_schema(conn, busy_timeout)?))
            .await?;

        debug!("SqliteTaskStore opened at {:?}", path);
        Ok(Self { conn })
    }

    /// Create a new in-memory database.
    pub async fn in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| Ok(init_schema(conn, Duration::from_secs(5))?))
            .await?;
        Ok(Self { conn })
    }

    /// Run a raw statement, the way external producers write rows.
    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &'static str) -> Result<usize, QueueError> {
        let changed = self.conn.call(move |conn| Ok(conn.execute(sql, [])?)).await?;
        Ok(changed)
    }
}

/// Format of SQLite's `CURRENT_TIMESTAMP` (UTC).
const SQLITE_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

/// Parse RFC 3339, or SQLite's own timestamp format written by external producers.
fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(value, SQLITE_TIMESTAMP).map(|dt| dt.and_utc()))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").map(|dt| dt.and_utc())
        })
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let id: String = row.get(1)?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

    let status: String = row.get(3)?;
    let status = TaskStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown task status '{}'", status).into(),
        )
    })?;

    let created_at: String = row.get(6)?;
    let processed_at: Option<String> = row.get(7)?;

    Ok(TaskRecord {
        seq: row.get(0)?,
        id,
        data: row.get(2)?,
        status,
        retry_count: row.get(4)?,
        last_error: row.get(5)?,
        created_at: parse_timestamp(6, &created_at)?,
        processed_at: processed_at
            .as_deref()
            .map(|s| parse_timestamp(7, s))
            .transpose()?,
    })
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, record: &TaskRecord) -> Result<(), QueueError> {
        let record = record.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO queue (id, data, status, retry_count, last_error, created_at, processed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        record.id.to_string(),
                        record.data,
                        record.status.as_str(),
                        record.retry_count,
                        record.last_error,
                        record.created_at.to_rfc3339(),
                        record.processed_at.map(|t| t.to_rfc3339()),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn select_first_pending(&self) -> Result<Option<TaskRecord>, QueueError> {
        let head = self
            .conn
            .call(|conn| {
                let sql = format!("{} WHERE status = 'pending' ORDER BY seq ASC LIMIT 1", SELECT_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query([])?;
                let head: Result<Option<TaskRecord>, (i64, String)> = match rows.next()? {
                    None => Ok(None),
                    Some(row) => match row_to_record(row) {
                        Ok(record) => Ok(Some(record)),
                        Err(e) => Err((row.get::<_, i64>(0)?, e.to_string())),
                    },
                };
                Ok(head)
            })
            .await?;

        head.map_err(|(seq, reason)| QueueError::CorruptRecord { seq, reason })
    }

    async fn update_status(
        &self,
        id: &Uuid,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let key = id.to_string();
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let changed = tx.execute(
                    "UPDATE queue SET status = ?1, processed_at = ?2
                     WHERE id = ?3 AND status = 'pending'",
                    params![status.as_str(), at.to_rfc3339(), key],
                )?;
                let outcome = if changed > 0 {
                    Some(true)
                } else {
                    let exists: i64 = tx.query_row(
                        "SELECT COUNT(*) FROM queue WHERE id = ?1",
                        [&key],
                        |row| row.get(0),
                    )?;
                    (exists > 0).then_some(false)
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        match outcome {
            Some(changed) => Ok(changed),
            None => {
                warn!("Status update for unknown task {}", id);
                Err(QueueError::NotFound(id.to_string()))
            }
        }
    }

    async fn quarantine(
        &self,
        seq: i64,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE queue SET status = ?1, processed_at = ?2
                     WHERE seq = ?3 AND status = 'pending'",
                    params![status.as_str(), at.to_rfc3339(), seq],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn record_failure(&self, id: &Uuid, error: &str) -> Result<u32, QueueError> {
        let key = id.to_string();
        let error = error.to_string();
        let count = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let changed = tx.execute(
                    "UPDATE queue SET retry_count = retry_count + 1, last_error = ?2 WHERE id = ?1",
                    params![key, error],
                )?;
                let count = if changed > 0 {
                    Some(tx.query_row(
                        "SELECT retry_count FROM queue WHERE id = ?1",
                        [&key],
                        |row| row.get::<_, u32>(0),
                    )?)
                } else {
                    None
                };
                tx.commit()?;
                Ok(count)
            })
            .await?;

        count.ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    async fn get(&self, id: &Uuid) -> Result<Option<TaskRecord>, QueueError> {
        let key = id.to_string();
        let record = self
            .conn
            .call(move |conn| {
                let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);
                let record = conn.query_row(&sql, [&key], row_to_record).optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    async fn list_by_status(
        &self,
        status: TaskStatus,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, QueueError> {
        let records = self
            .conn
            .call(move |conn| {
                let sql = format!("{} WHERE status = ?1 ORDER BY seq ASC LIMIT ?2", SELECT_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params![status.as_str(), limit as i64])?;
                let mut records = Vec::new();
                while let Some(row) = rows.next()? {
                    match row_to_record(row) {
                        Ok(record) => records.push(record),
                        // Quarantined rows stay in the table but cannot be listed.
                        Err(e) => {
                            let seq: i64 = row.get(0)?;
                            warn!("Skipping undecodable record seq {}: {}", seq, e);
                        }
                    }
                }
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    async fn count_by_status(&self) -> Result<BTreeMap<TaskStatus, u64>, QueueError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT status, COUNT(*) FROM queue GROUP BY status")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut counts = BTreeMap::new();
        for (status, count) in rows {
            match TaskStatus::parse(&status) {
                Some(status) => {
                    counts.insert(status, count as u64);
                }
                None => warn!("Ignoring {} records with unknown status '{}'", count, status),
            }
        }
        Ok(counts)
    }
}
