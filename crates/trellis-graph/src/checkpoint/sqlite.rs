use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use trellis_core::error::{Result, TrellisError};
use trellis_core::types::ThreadId;

use super::{Checkpoint, Checkpointer};
use crate::state::State;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS checkpoints (
         thread_id TEXT NOT NULL,
         seq INTEGER NOT NULL,
         state_json TEXT NOT NULL,
         created_at TEXT NOT NULL,
         PRIMARY KEY (thread_id, seq)
     );";

/// Persistent checkpoint store backed by SQLite.
///
/// A single connection behind a mutex; sequence numbers are assigned inside
/// a transaction so concurrent savers on one thread never collide.
pub struct SqliteSaver {
    conn: Mutex<Connection>,
}

impl SqliteSaver {
    /// Open or create the checkpoint database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TrellisError::Database(format!("Failed to create checkpoint directory: {}", e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| TrellisError::Database(format!("Failed to open checkpoint store: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| TrellisError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA).map_err(|e| {
            TrellisError::Database(format!("Failed to initialize checkpoint schema: {}", e))
        })?;

        debug!(path = %path.display(), "Checkpoint store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| TrellisError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| TrellisError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Thread ids with at least one checkpoint, sorted.
    pub fn list_threads(&self) -> Result<Vec<ThreadId>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| TrellisError::Database(e.to_string()))?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT thread_id FROM checkpoints ORDER BY thread_id")
            .map_err(|e| TrellisError::Database(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| TrellisError::Database(e.to_string()))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(ThreadId(row.map_err(|e| TrellisError::Database(e.to_string()))?));
        }
        Ok(ids)
    }

    /// Delete all checkpoints for a thread.
    pub fn delete_thread(&self, thread_id: &ThreadId) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| TrellisError::Database(e.to_string()))?;
        let deleted = conn
            .execute(
                "DELETE FROM checkpoints WHERE thread_id = ?1",
                params![thread_id.as_str()],
            )
            .map_err(|e| TrellisError::Database(format!("Failed to delete checkpoints: {}", e)))?;
        Ok(deleted)
    }

    fn save_blocking(&self, thread_id: ThreadId, state: State) -> Result<Checkpoint> {
        let state_json = serde_json::to_string(&state)?;
        let created_at = Utc::now();

        let mut conn = self
            .conn
            .lock()
            .map_err(|e| TrellisError::Database(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| TrellisError::Database(e.to_string()))?;

        let seq: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(seq) + 1, 0) FROM checkpoints WHERE thread_id = ?1",
                params![thread_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| TrellisError::Database(e.to_string()))?;

        tx.execute(
            "INSERT INTO checkpoints (thread_id, seq, state_json, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                thread_id.as_str(),
                seq,
                state_json,
                created_at.to_rfc3339()
            ],
        )
        .map_err(|e| TrellisError::Database(format!("Failed to save checkpoint: {}", e)))?;
        tx.commit()
            .map_err(|e| TrellisError::Database(e.to_string()))?;

        debug!(thread_id = %thread_id, seq, "Checkpoint saved");
        Ok(Checkpoint {
            thread_id,
            seq: seq as u64,
            state,
            created_at,
        })
    }

    fn query_checkpoints(&self, thread_id: &ThreadId, latest_only: bool) -> Result<Vec<Checkpoint>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| TrellisError::Database(e.to_string()))?;
        let sql = if latest_only {
            "SELECT seq, state_json, created_at FROM checkpoints
             WHERE thread_id = ?1 ORDER BY seq DESC LIMIT 1"
        } else {
            "SELECT seq, state_json, created_at FROM checkpoints
             WHERE thread_id = ?1 ORDER BY seq ASC"
        };
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| TrellisError::Database(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![thread_id.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| TrellisError::Database(e.to_string()))?;

        let mut checkpoints = Vec::new();
        for row in rows {
            let (seq, state_json, ts_str) = row.map_err(|e| TrellisError::Database(e.to_string()))?;
            let state: State = serde_json::from_str(&state_json).map_err(|e| {
                TrellisError::Checkpoint(format!("Failed to deserialize state: {}", e))
            })?;
            checkpoints.push(Checkpoint {
                thread_id: thread_id.clone(),
                seq: seq as u64,
                state,
                created_at: DateTime::parse_from_rfc3339(&ts_str)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(checkpoints)
    }

    /// Number of checkpoints stored for a thread.
    pub fn count(&self, thread_id: &ThreadId) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| TrellisError::Database(e.to_string()))?;
        let count: Option<i64> = conn
            .query_row(
                "SELECT COUNT(*) FROM checkpoints WHERE thread_id = ?1",
                params![thread_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| TrellisError::Database(e.to_string()))?;
        Ok(count.unwrap_or(0) as usize)
    }
}

impl Checkpointer for SqliteSaver {
    fn save(&self, thread_id: &ThreadId, state: &State) -> BoxFuture<'_, Result<Checkpoint>> {
        let thread_id = thread_id.clone();
        let state = state.clone();
        Box::pin(async move { self.save_blocking(thread_id, state) })
    }

    fn load_latest(&self, thread_id: &ThreadId) -> BoxFuture<'_, Result<Option<Checkpoint>>> {
        let thread_id = thread_id.clone();
        Box::pin(async move {
            Ok(self.query_checkpoints(&thread_id, true)?.into_iter().next())
        })
    }

    fn history(&self, thread_id: &ThreadId) -> BoxFuture<'_, Result<Vec<Checkpoint>>> {
        let thread_id = thread_id.clone();
        Box::pin(async move { self.query_checkpoints(&thread_id, false) })
    }
}
