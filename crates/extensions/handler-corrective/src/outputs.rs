//! `classifier_outputs` access.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::params;
use tokio_rusqlite::Connection;
use tracing::debug;

use incidentd_workqueue::HandlerError;

/// Timestamp format used by the dashboard for `classifier_outputs`.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The classifier's output table, owned by the dashboard database.
///
/// Only the corrective-action columns are written here; the table itself is
/// created by the dashboard.
pub struct ClassifierOutputs {
    conn: Connection,
}

impl ClassifierOutputs {
    /// Open the database holding `classifier_outputs`.
    pub async fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, HandlerError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)
            .await
            .map_err(|e| HandlerError::Storage(format!("Failed to open {}: {}", path.display(), e)))?;
        conn.call(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            Ok(())
        })
        .await
        .map_err(storage)?;

        debug!("ClassifierOutputs opened at {:?}", path);
        Ok(Self { conn })
    }

    /// Store a corrective action on the row for `payload_id`.
    ///
    /// Returns the number of rows updated; zero means no such payload.
    pub async fn set_corrective_action(
        &self,
        payload_id: &str,
        action: &str,
        at: DateTime<Utc>,
    ) -> Result<usize, HandlerError> {
        let payload_id = payload_id.to_string();
        let action = action.to_string();
        let now = at.format(TIMESTAMP_FORMAT).to_string();

        self.conn
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE classifier_outputs
                     SET corrective_action = ?1, processed_at = ?2, updated_at = ?2
                     WHERE payload_id = ?3",
                    params![action, now, payload_id],
                )?;
                Ok(updated)
            })
            .await
            .map_err(storage)
    }
}

fn storage(e: tokio_rusqlite::Error) -> HandlerError {
    HandlerError::Storage(e.to_string())
}
