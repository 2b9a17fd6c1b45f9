//! Per-thread, append-only state snapshots.
//!
//! The executor only talks to the [`Checkpointer`] trait; storage mechanics
//! live in the backends ([`MemorySaver`], [`SqliteSaver`]).

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use trellis_core::error::Result;
use trellis_core::types::ThreadId;

use crate::state::State;

pub use memory::MemorySaver;
pub use sqlite::SqliteSaver;

/// A single checkpoint snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Thread being checkpointed.
    pub thread_id: ThreadId,
    /// Position within the thread, starting at 0.
    pub seq: u64,
    /// State after the step that produced this checkpoint.
    pub state: State,
    /// When the checkpoint was created.
    pub created_at: DateTime<Utc>,
}

/// Persistence backend for thread checkpoints.
///
/// Implementations must serialize writes per thread so that sequence
/// numbers stay strictly increasing; writes to different threads are
/// independent.
pub trait Checkpointer: Send + Sync + 'static {
    /// Append a snapshot to a thread, creating the thread on first use.
    fn save(&self, thread_id: &ThreadId, state: &State) -> BoxFuture<'_, Result<Checkpoint>>;

    /// Most recent snapshot of a thread, or `None` for a thread never written.
    fn load_latest(&self, thread_id: &ThreadId) -> BoxFuture<'_, Result<Option<Checkpoint>>>;

    /// All snapshots of a thread in sequence order.
    fn history(&self, thread_id: &ThreadId) -> BoxFuture<'_, Result<Vec<Checkpoint>>>;
}
