use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::types::{CheckpointRecord, CheckpointStore, CorruptRecord};

/// Checkpoint store backed by a SQLite file, surviving process restarts.
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

type CheckpointRow = (String, String, i64, String, String, String);

impl SqliteCheckpointStore {
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open checkpoint store {}", db_path.display()))?;

        let store = Self { pool };
        store.initialize_schema().await?;
        tracing::debug!("Checkpoint store ready at {}", db_path.display());
        Ok(store)
    }

    pub fn default_db_path() -> Result<PathBuf> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home.join(".askdb").join("checkpoints.db"))
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS checkpoints (
                    id TEXT PRIMARY KEY,
                    thread_id TEXT NOT NULL,
                    step INTEGER NOT NULL,
                    stage TEXT NOT NULL,
                    state_json TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE (thread_id, step)
                )
                "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_thread ON checkpoints(thread_id, step DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn record_from_row(row: CheckpointRow) -> Result<CheckpointRecord> {
        let (id, thread_id, step, stage, state_json, created_at) = row;
        let corrupt = |message: String| CorruptRecord {
            thread_id: thread_id.clone(),
            message,
        };

        let id = Uuid::parse_str(&id)
            .map_err(|e| corrupt(format!("invalid checkpoint id `{}`: {}", id, e)))?;
        let step = u32::try_from(step)
            .map_err(|_| corrupt(format!("invalid checkpoint step {}", step)))?;
        let state = serde_json::from_str(&state_json)
            .map_err(|e| corrupt(format!("invalid checkpoint state: {}", e)))?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("invalid checkpoint timestamp `{}`: {}", created_at, e)))?;

        Ok(CheckpointRecord {
            id,
            thread_id,
            step,
            stage,
            state,
            created_at,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, record: CheckpointRecord) -> Result<()> {
        let state_json = serde_json::to_string(&record.state)?;

        sqlx::query(
            r#"
            INSERT INTO checkpoints (id, thread_id, step, stage, state_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (thread_id, step) DO UPDATE SET
                id = excluded.id,
                stage = excluded.stage,
                state_json = excluded.state_json,
                created_at = excluded.created_at
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.thread_id)
        .bind(record.step as i64)
        .bind(&record.stage)
        .bind(state_json)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<CheckpointRecord>> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            r#"
            SELECT id, thread_id, step, stage, state_json, created_at
            FROM checkpoints
            WHERE thread_id = ?
            ORDER BY step DESC
            LIMIT 1
            "#,
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::record_from_row).transpose()
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<CheckpointRecord>> {
        let rows = sqlx::query_as::<_, CheckpointRow>(
            r#"
            SELECT id, thread_id, step, stage, state_json, created_at
            FROM checkpoints
            WHERE thread_id = ?
            ORDER BY step ASC
            "#,
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::record_from_row).collect()
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
