//! Environment-sourced settings.

use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::services::agent::DEFAULT_OLLAMA_HOST;
use crate::services::storage::{CheckpointLocation, SqliteCheckpointStore};

pub const DEFAULT_THREAD_ID: &str = "1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Which generation backend drafts and answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmProvider {
    Ollama { host: String },
    Anthropic { api_key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_connection_string: String,
    pub model_name: String,
    pub prompt_template_name: String,
    pub debug: bool,
    pub db_test_query: Option<String>,
    pub graph_save_path: Option<PathBuf>,
    pub provider: LlmProvider,
    pub checkpoints: CheckpointLocation,
    pub thread_id: String,
}

impl Config {
    /// Process environment overlaid with `./.env`; values from the file win
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut dotenv_vars = HashMap::new();
        if let Ok(entries) = dotenv::dotenv_iter() {
            for entry in entries {
                let (key, value) = entry.map_err(|e| ConfigError::Invalid {
                    var: ".env",
                    reason: e.to_string(),
                })?;
                dotenv_vars.insert(key, value);
            }
        }

        Self::from_lookup(|key| {
            dotenv_vars
                .get(key)
                .cloned()
                .or_else(|| std::env::var(key).ok())
        })
    }

    /// Build from any key lookup; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let provider = match get("LLM_PROVIDER")
            .map(|p| p.trim().to_lowercase())
            .as_deref()
        {
            None | Some("ollama") => LlmProvider::Ollama {
                host: get("OLLAMA_HOST")
                    .map(|h| h.trim().trim_end_matches('/').to_string())
                    .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
            },
            Some("anthropic") => LlmProvider::Anthropic {
                api_key: required("ANTHROPIC_API_KEY")?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LLM_PROVIDER",
                    reason: format!("unknown provider `{}` (expected ollama or anthropic)", other),
                });
            }
        };

        let checkpoints = match get("CHECKPOINT_DB_PATH") {
            Some(path) if path.trim().eq_ignore_ascii_case("memory") => CheckpointLocation::Memory,
            Some(path) => CheckpointLocation::Sqlite(PathBuf::from(path.trim())),
            None => CheckpointLocation::Sqlite(SqliteCheckpointStore::default_db_path().map_err(
                |e| ConfigError::Invalid {
                    var: "CHECKPOINT_DB_PATH",
                    reason: e.to_string(),
                },
            )?),
        };

        Ok(Self {
            db_connection_string: required("DB_CONNECTION_STRING")?,
            model_name: required("MODEL_NAME")?,
            prompt_template_name: required("PROMPT_TEMPLATE_NAME")?,
            debug: get("PRINT_DEBUG_MSG").is_some(),
            db_test_query: get("DB_TEST_QUERY"),
            graph_save_path: get("GRAPH_STATE_SAVE_PATH").map(PathBuf::from),
            provider,
            checkpoints,
            thread_id: get("THREAD_ID").unwrap_or_else(|| DEFAULT_THREAD_ID.to_string()),
        })
    }

    /// Default `tracing` filter when `RUST_LOG` is unset
    pub fn log_filter(&self) -> &'static str {
        if self.debug { "askdb=debug,warn" } else { "askdb=info,warn" }
    }
}
