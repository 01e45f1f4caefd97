use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use logport_core::IngestError;
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::envelope::RetryEnvelope;
use crate::store::RetryStore;

/// Durable `RetryStore` backed by a local SQLite database, following
/// the WAL-table pattern used for at-rest durability elsewhere in the
/// pipeline: every enqueued envelope survives a process restart.
///
/// `rusqlite::Connection` is not `Send`-safe to share across awaits, so
/// every call is dispatched through `spawn_blocking`, serialized by a
/// single connection behind a `parking_lot::Mutex`.
pub struct SqliteRetryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRetryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| IngestError::Supervisor(format!("opening retry store: {e}").into()))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS retry_envelopes (
                 id              INTEGER PRIMARY KEY AUTOINCREMENT,
                 entry_json      TEXT NOT NULL,
                 attempt         INTEGER NOT NULL,
                 next_attempt_at TEXT NOT NULL,
                 last_error      TEXT NOT NULL
             );",
        )
        .map_err(|e| IngestError::Supervisor(format!("creating retry table: {e}").into()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, IngestError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| IngestError::Supervisor(format!("opening retry store: {e}").into()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS retry_envelopes (
                 id              INTEGER PRIMARY KEY AUTOINCREMENT,
                 entry_json      TEXT NOT NULL,
                 attempt         INTEGER NOT NULL,
                 next_attempt_at TEXT NOT NULL,
                 last_error      TEXT NOT NULL
             );",
        )
        .map_err(|e| IngestError::Supervisor(format!("creating retry table: {e}").into()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl RetryStore for SqliteRetryStore {
    async fn enqueue(&self, envelope: RetryEnvelope) -> Result<(), IngestError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let entry_json = serde_json::to_string(&envelope.entry).map_err(|e| {
                IngestError::Supervisor(format!("serializing retry envelope: {e}").into())
            })?;
            conn.lock()
                .execute(
                    "INSERT INTO retry_envelopes (entry_json, attempt, next_attempt_at, last_error)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        entry_json,
                        envelope.attempt,
                        envelope.next_attempt_at.to_rfc3339(),
                        envelope.last_error,
                    ],
                )
                .map_err(|e| IngestError::Supervisor(format!("inserting retry row: {e}").into()))
        })
        .await
        .map_err(|e| IngestError::Supervisor(format!("retry store task panicked: {e}").into()))??;
        Ok(())
    }

    async fn take_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RetryEnvelope>, IngestError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<Vec<RetryEnvelope>, IngestError> {
            let guard = conn.lock();
            let mut stmt = guard
                .prepare(
                    "SELECT id, entry_json, attempt, next_attempt_at, last_error
                     FROM retry_envelopes
                     WHERE next_attempt_at <= ?1
                     ORDER BY next_attempt_at ASC
                     LIMIT ?2",
                )
                .map_err(|e| IngestError::Supervisor(format!("preparing select: {e}").into()))?;

            let rows = stmt
                .query_map(params![now.to_rfc3339(), limit as i64], |row| {
                    let id: i64 = row.get(0)?;
                    let entry_json: String = row.get(1)?;
                    let attempt: u32 = row.get(2)?;
                    let next_attempt_at: String = row.get(3)?;
                    let last_error: String = row.get(4)?;
                    Ok((id, entry_json, attempt, next_attempt_at, last_error))
                })
                .map_err(|e| IngestError::Supervisor(format!("querying due rows: {e}").into()))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| IngestError::Supervisor(format!("reading due rows: {e}").into()))?;

            let mut out = Vec::with_capacity(rows.len());
            let mut ids = Vec::with_capacity(rows.len());
            for (id, entry_json, attempt, next_attempt_at, last_error) in rows {
                let entry = serde_json::from_str(&entry_json).map_err(|e| {
                    IngestError::Supervisor(format!("deserializing retry entry: {e}").into())
                })?;
                let next_attempt_at = DateTime::parse_from_rfc3339(&next_attempt_at)
                    .map_err(|e| {
                        IngestError::Supervisor(format!("parsing next_attempt_at: {e}").into())
                    })?
                    .with_timezone(&Utc);
                out.push(RetryEnvelope {
                    entry,
                    attempt,
                    next_attempt_at,
                    last_error,
                });
                ids.push(id);
            }
            drop(stmt);

            for id in ids {
                guard
                    .execute("DELETE FROM retry_envelopes WHERE id = ?1", params![id])
                    .map_err(|e| {
                        IngestError::Supervisor(format!("deleting taken row: {e}").into())
                    })?;
            }

            Ok(out)
        })
        .await
        .map_err(|e| IngestError::Supervisor(format!("retry store task panicked: {e}").into()))?
    }

    async fn len(&self) -> Result<usize, IngestError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            conn.lock()
                .query_row("SELECT COUNT(*) FROM retry_envelopes", [], |row| {
                    row.get::<_, i64>(0)
                })
                .map(|count| count as usize)
                .map_err(|e| IngestError::Supervisor(format!("counting retry rows: {e}").into()))
        })
        .await
        .map_err(|e| IngestError::Supervisor(format!("retry store task panicked: {e}").into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logport_core::{IncomingLogEntry, LogEntry};
    use std::collections::BTreeMap;

    fn envelope(next_attempt_at: DateTime<Utc>) -> RetryEnvelope {
        let entry = LogEntry::from_incoming(IncomingLogEntry {
            app_id: "svc".into(),
            level: "INFO".into(),
            message: "hi".into(),
            source: "test".into(),
            timestamp: None,
            metadata: BTreeMap::new(),
            trace_id: None,
            user_id: None,
            environment: None,
        })
        .unwrap();
        RetryEnvelope {
            entry,
            attempt: 1,
            next_attempt_at,
            last_error: "boom".into(),
        }
    }

    #[tokio::test]
    async fn round_trips_through_sqlite() {
        let store = SqliteRetryStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.enqueue(envelope(now - chrono::Duration::seconds(1))).await.unwrap();
        store
            .enqueue(envelope(now + chrono::Duration::seconds(60)))
            .await
            .unwrap();

        assert_eq!(store.len().await.unwrap(), 2);

        let due = store.take_due(now, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn survives_across_store_handles_to_same_connection() {
        let store = SqliteRetryStore::open_in_memory().unwrap();
        store.enqueue(envelope(Utc::now())).await.unwrap();
        let due = store.take_due(Utc::now(), 1).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].entry.app_id, "svc");
    }
}
