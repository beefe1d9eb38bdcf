//! Checkpoint storage for suspended pipeline sessions.

mod memory;
mod sqlite;
mod types;

pub use memory::InMemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
pub use types::{CheckpointRecord, CheckpointStore, CorruptRecord};

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

/// Where checkpoints are kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointLocation {
    Memory,
    Sqlite(PathBuf),
}

/// Open the store for `location`
pub async fn open_checkpoint_store(location: &CheckpointLocation) -> Result<Arc<dyn CheckpointStore>> {
    match location {
        CheckpointLocation::Memory => {
            tracing::warn!("Using in-memory checkpoints; suspended sessions will not survive a restart");
            Ok(Arc::new(InMemoryCheckpointStore::new()))
        }
        CheckpointLocation::Sqlite(path) => Ok(Arc::new(SqliteCheckpointStore::open(path).await?)),
    }
}
