use anyhow::Result;
use async_lock::RwLock;
use async_trait::async_trait;
use std::collections::HashMap;

use super::types::{CheckpointRecord, CheckpointStore};

/// Checkpoints kept in process memory; lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    threads: RwLock<HashMap<String, Vec<CheckpointRecord>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, record: CheckpointRecord) -> Result<()> {
        let mut threads = self.threads.write().await;
        let history = threads.entry(record.thread_id.clone()).or_default();

        history.retain(|existing| existing.step != record.step);
        history.push(record);
        history.sort_by_key(|r| r.step);
        Ok(())
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<CheckpointRecord>> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(thread_id)
            .and_then(|history| history.last().cloned()))
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<CheckpointRecord>> {
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).cloned().unwrap_or_default())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<bool> {
        let mut threads = self.threads.write().await;
        Ok(threads.remove(thread_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_latest_is_highest_step() {
        smol::block_on(async {
            let store = InMemoryCheckpointStore::new();
            store
                .save(CheckpointRecord::new("1", 2, "executed", json!({"q": 2})))
                .await
                .unwrap();
            store
                .save(CheckpointRecord::new("1", 1, "drafted", json!({"q": 1})))
                .await
                .unwrap();

            let latest = store.latest("1").await.unwrap().unwrap();
            assert_eq!(latest.step, 2);
            assert_eq!(latest.stage, "executed");

            let steps: Vec<u32> = store
                .history("1")
                .await
                .unwrap()
                .iter()
                .map(|r| r.step)
                .collect();
            assert_eq!(steps, vec![1, 2]);
        });
    }

    #[test]
    fn test_same_step_replaces() {
        smol::block_on(async {
            let store = InMemoryCheckpointStore::new();
            store
                .save(CheckpointRecord::new("1", 1, "drafted", json!({"v": "old"})))
                .await
                .unwrap();
            store
                .save(CheckpointRecord::new("1", 1, "drafted", json!({"v": "new"})))
                .await
                .unwrap();

            assert_eq!(store.history("1").await.unwrap().len(), 1);
            assert_eq!(store.latest("1").await.unwrap().unwrap().state["v"], "new");
        });
    }

    #[test]
    fn test_threads_are_isolated() {
        smol::block_on(async {
            let store = InMemoryCheckpointStore::new();
            store
                .save(CheckpointRecord::new("a", 1, "drafted", json!({})))
                .await
                .unwrap();

            assert!(store.latest("b").await.unwrap().is_none());
            assert!(store.delete_thread("a").await.unwrap());
            assert!(!store.delete_thread("a").await.unwrap());
            assert!(store.latest("a").await.unwrap().is_none());
        });
    }
}
