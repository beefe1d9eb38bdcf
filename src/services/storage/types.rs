use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// One persisted pipeline position for a thread.
///
/// `stage` and `state` are opaque to the store; the pipeline owns their
/// encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id: Uuid,
    pub thread_id: String,
    pub step: u32,
    pub stage: String,
    pub state: Value,
    pub created_at: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn new(thread_id: impl Into<String>, step: u32, stage: impl Into<String>, state: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id: thread_id.into(),
            step,
            stage: stage.into(),
            state,
            created_at: Utc::now(),
        }
    }
}

/// A stored checkpoint that can no longer be decoded
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unreadable checkpoint for thread `{thread_id}`: {message}")]
pub struct CorruptRecord {
    pub thread_id: String,
    pub message: String,
}

/// Durable storage for pipeline checkpoints, keyed by thread id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint. A record with the same thread and step replaces
    /// the old one.
    async fn save(&self, record: CheckpointRecord) -> Result<()>;

    /// The checkpoint with the highest step for `thread_id`.
    ///
    /// Records that cannot be decoded fail with a [`CorruptRecord`].
    async fn latest(&self, thread_id: &str) -> Result<Option<CheckpointRecord>>;

    /// All checkpoints for `thread_id`, oldest first
    async fn history(&self, thread_id: &str) -> Result<Vec<CheckpointRecord>>;

    /// Drop every checkpoint of `thread_id`; returns whether any existed
    async fn delete_thread(&self, thread_id: &str) -> Result<bool>;

    /// Release resources held by the store
    async fn close(&self) {}
}
