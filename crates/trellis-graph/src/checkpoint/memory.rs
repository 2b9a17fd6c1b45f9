use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::debug;

use trellis_core::error::{Result, TrellisError};
use trellis_core::types::ThreadId;

use super::{Checkpoint, Checkpointer};
use crate::state::State;

type ThreadLog = Arc<Mutex<Vec<Checkpoint>>>;

/// In-memory checkpoint store.
///
/// Each thread has its own lock, so writers on different threads never
/// wait on each other. Contents are lost when the saver is dropped.
#[derive(Default)]
pub struct MemorySaver {
    threads: RwLock<HashMap<ThreadId, ThreadLog>>,
}

impl MemorySaver {
    pub fn new() -> Self {
        Self::default()
    }

    fn thread_log(&self, thread_id: &ThreadId) -> Result<Option<ThreadLog>> {
        let threads = self
            .threads
            .read()
            .map_err(|e| TrellisError::Checkpoint(e.to_string()))?;
        Ok(threads.get(thread_id).cloned())
    }

    fn thread_log_or_create(&self, thread_id: &ThreadId) -> Result<ThreadLog> {
        if let Some(log) = self.thread_log(thread_id)? {
            return Ok(log);
        }
        let mut threads = self
            .threads
            .write()
            .map_err(|e| TrellisError::Checkpoint(e.to_string()))?;
        Ok(threads.entry(thread_id.clone()).or_default().clone())
    }

    /// Thread ids with at least one checkpoint, sorted.
    pub fn list_threads(&self) -> Result<Vec<ThreadId>> {
        let threads = self
            .threads
            .read()
            .map_err(|e| TrellisError::Checkpoint(e.to_string()))?;
        let mut ids: Vec<ThreadId> = threads.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Drop a thread and all its checkpoints. Returns how many were removed.
    pub fn delete_thread(&self, thread_id: &ThreadId) -> Result<usize> {
        let mut threads = self
            .threads
            .write()
            .map_err(|e| TrellisError::Checkpoint(e.to_string()))?;
        let Some(log) = threads.remove(thread_id) else {
            return Ok(0);
        };
        let removed = log
            .lock()
            .map_err(|e| TrellisError::Checkpoint(e.to_string()))?
            .len();
        Ok(removed)
    }
}

impl Checkpointer for MemorySaver {
    fn save(&self, thread_id: &ThreadId, state: &State) -> BoxFuture<'_, Result<Checkpoint>> {
        let thread_id = thread_id.clone();
        let state = state.clone();

        Box::pin(async move {
            let log = self.thread_log_or_create(&thread_id)?;
            let mut log = log
                .lock()
                .map_err(|e| TrellisError::Checkpoint(e.to_string()))?;

            let cp = Checkpoint {
                seq: log.len() as u64,
                thread_id,
                state,
                created_at: Utc::now(),
            };
            log.push(cp.clone());

            debug!(thread_id = %cp.thread_id, seq = cp.seq, "Checkpoint saved");
            Ok(cp)
        })
    }

    fn load_latest(&self, thread_id: &ThreadId) -> BoxFuture<'_, Result<Option<Checkpoint>>> {
        let thread_id = thread_id.clone();

        Box::pin(async move {
            let Some(log) = self.thread_log(&thread_id)? else {
                return Ok(None);
            };
            let log = log
                .lock()
                .map_err(|e| TrellisError::Checkpoint(e.to_string()))?;
            Ok(log.last().cloned())
        })
    }

    fn history(&self, thread_id: &ThreadId) -> BoxFuture<'_, Result<Vec<Checkpoint>>> {
        let thread_id = thread_id.clone();

        Box::pin(async move {
            let Some(log) = self.thread_log(&thread_id)? else {
                return Ok(Vec::new());
            };
            let log = log
                .lock()
                .map_err(|e| TrellisError::Checkpoint(e.to_string()))?;
            Ok(log.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StateSchema;
    use crate::state::StateUpdate;
    use serde_json::json;

    fn state(n: i64) -> State {
        StateSchema::new()
            .field("n")
            .merge(&State::new(), StateUpdate::new().set("n", json!(n)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load_latest() {
        let saver = MemorySaver::new();
        let thread = ThreadId::from("t1");

        let cp = saver.save(&thread, &state(1)).await.unwrap();
        assert_eq!(cp.seq, 0);

        let loaded = saver.load_latest(&thread).await.unwrap().unwrap();
        assert_eq!(loaded.state, state(1));
        assert_eq!(loaded.thread_id, thread);
    }

    #[tokio::test]
    async fn test_sequence_is_monotonic_per_thread() {
        let saver = MemorySaver::new();
        let a = ThreadId::from("a");
        let b = ThreadId::from("b");

        for i in 0..3 {
            let cp = saver.save(&a, &state(i)).await.unwrap();
            assert_eq!(cp.seq, i as u64);
        }
        let cp = saver.save(&b, &state(9)).await.unwrap();
        assert_eq!(cp.seq, 0);

        let history = saver.history(&a).await.unwrap();
        let seqs: Vec<u64> = history.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(saver.load_latest(&a).await.unwrap().unwrap().state, state(2));
    }

    #[tokio::test]
    async fn test_unknown_thread_is_empty_not_error() {
        let saver = MemorySaver::new();
        let thread = ThreadId::from("never-written");
        assert!(saver.load_latest(&thread).await.unwrap().is_none());
        assert!(saver.history(&thread).await.unwrap().is_empty());
        assert!(saver.list_threads().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_thread() {
        let saver = MemorySaver::new();
        let thread = ThreadId::from("gone");
        saver.save(&thread, &state(1)).await.unwrap();
        saver.save(&thread, &state(2)).await.unwrap();

        assert_eq!(saver.list_threads().unwrap(), vec![thread.clone()]);
        assert_eq!(saver.delete_thread(&thread).unwrap(), 2);
        assert!(saver.load_latest(&thread).await.unwrap().is_none());
    }

    #[test]
    fn test_concurrent_writers_keep_sequence_dense() {
        let saver = Arc::new(MemorySaver::new());
        let thread = ThreadId::from("shared");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let saver = saver.clone();
                let thread = thread.clone();
                std::thread::spawn(move || {
                    futures::executor::block_on(saver.save(&thread, &state(i))).unwrap()
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let history = futures::executor::block_on(saver.history(&thread)).unwrap();
        let seqs: Vec<u64> = history.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, (0..8).collect::<Vec<u64>>());
    }
}
