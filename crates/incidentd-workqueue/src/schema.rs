//! Database schema management.

use std::time::Duration;

use rusqlite::Connection;
use tokio_rusqlite::Error;

/// Initialize connection settings and the queue schema.
pub fn init_schema(conn: &Connection, busy_timeout: Duration) -> Result<(), Error> {
    conn.busy_timeout(busy_timeout)?;
    // In-memory databases report "memory" here, which is fine.
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = r#"
-- Queued tasks. `seq` fixes dispatch order, `id` is the public identifier.
CREATE TABLE IF NOT EXISTS queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    data TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    processed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_queue_status_seq ON queue(status, seq);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, Duration::from_millis(100)).unwrap();
        init_schema(&conn, Duration::from_millis(100)).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'queue'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_status_defaults_to_pending() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, Duration::from_millis(100)).unwrap();
        conn.execute(
            "INSERT INTO queue (id, data, created_at) VALUES ('a', '{}', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let status: String = conn
            .query_row("SELECT status FROM queue WHERE id = 'a'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(status, "pending");
    }
}
