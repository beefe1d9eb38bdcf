//! Startup and shutdown of everything a session needs.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::{Config, LlmProvider};
use crate::pipeline::{AnswerComposer, Pipeline, QueryDrafter, QueryExecutor, save_graph};
use crate::services::agent::{AnthropicClient, LanguageModel, OllamaClient};
use crate::services::database::{SchemaMetadata, SqlBackend, SqlDatabase, run_query_tool};
use crate::services::prompts::{PromptTemplate, QUERY_TEMPLATE_VARIABLES};
use crate::services::storage::{CheckpointStore, open_checkpoint_store};

/// The wired-up pipeline plus the backends it borrows.
pub struct App {
    pub config: Config,
    pub pipeline: Pipeline,
    database: Arc<SqlDatabase>,
    store: Arc<dyn CheckpointStore>,
}

pub fn build_model(config: &Config) -> Result<Arc<dyn LanguageModel>> {
    let model: Arc<dyn LanguageModel> = match &config.provider {
        LlmProvider::Ollama { host } => {
            tracing::info!("Using Ollama model {} at {}", config.model_name, host);
            Arc::new(OllamaClient::new(host.clone(), config.model_name.clone()))
        }
        LlmProvider::Anthropic { api_key } => {
            tracing::info!("Using Anthropic model {}", config.model_name);
            Arc::new(
                AnthropicClient::builder()
                    .api_key(api_key.clone())
                    .model(config.model_name.clone())
                    .build()?,
            )
        }
    };
    Ok(model)
}

impl App {
    /// Connect the data store, fetch the schema, verify the prompt template
    /// and open the checkpoint store.
    pub async fn startup(config: Config) -> Result<Self> {
        let template = PromptTemplate::resolve(&config.prompt_template_name)?;
        template
            .verify(&QUERY_TEMPLATE_VARIABLES)
            .with_context(|| format!("Prompt template `{}` is unusable", template.name))?;

        let model = build_model(&config)?;

        let database = Arc::new(
            SqlDatabase::connect(&config.db_connection_string)
                .await
                .context("Failed to connect to the data store")?,
        );
        let schema = SchemaMetadata::load(database.as_ref()).await?;
        tracing::info!(
            "Loaded schema for {} tables ({})",
            schema.table_names.len(),
            schema.dialect
        );

        let store = open_checkpoint_store(&config.checkpoints).await?;

        let pipeline = Pipeline::new(
            QueryDrafter::new(model.clone(), template, schema),
            QueryExecutor::new(database.clone()),
            AnswerComposer::new(model),
            store.clone(),
        );

        Ok(Self {
            config,
            pipeline,
            database,
            store,
        })
    }

    /// Dialect, tables, the test query and the verified template, for
    /// debug output. Also writes the pipeline graph when a path is set.
    pub async fn diagnostics(&self) -> Result<String> {
        let schema = self.pipeline.drafter().schema();
        let mut report = format!("{}\n{:?}\n", schema.dialect, schema.table_names);

        if let Some(test_query) = &self.config.db_test_query {
            let result = run_query_tool(self.database.as_ref(), test_query).await;
            report.push_str(&format!("{}\n", result));
        }

        report.push_str(&self.pipeline.drafter().template().pretty());

        if let Some(path) = &self.config.graph_save_path {
            save_graph(path)?;
            report.push_str(&format!("\nGraph saved to {}\n", path.display()));
        }
        Ok(report)
    }

    pub async fn shutdown(self) {
        self.store.close().await;
        self.database.close().await;
        tracing::info!("Shut down cleanly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::CheckpointLocation;

    fn config(db: &str) -> Config {
        Config {
            db_connection_string: db.to_string(),
            model_name: "llama3.1".to_string(),
            prompt_template_name: "default".to_string(),
            debug: true,
            db_test_query: Some("SELECT 1 + 1".to_string()),
            graph_save_path: None,
            provider: LlmProvider::Ollama {
                host: "http://localhost:11434".to_string(),
            },
            checkpoints: CheckpointLocation::Memory,
            thread_id: "1".to_string(),
        }
    }

    #[test]
    fn test_startup_and_diagnostics() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let db_path = dir.path().join("company.db");
            let url = format!("sqlite:///{}?mode=rwc", db_path.display());
            {
                let db = SqlDatabase::connect(&url).await.unwrap();
                db.execute("CREATE TABLE employees (id INTEGER PRIMARY KEY, name TEXT)")
                    .await
                    .unwrap();
                db.close().await;
            }

            let mut config = config(&url);
            config.graph_save_path = Some(dir.path().join("graph.mmd"));
            let app = App::startup(config).await.unwrap();

            let schema = app.pipeline.drafter().schema();
            assert_eq!(schema.dialect, "sqlite");
            assert_eq!(schema.table_names, vec!["employees"]);

            let report = app.diagnostics().await.unwrap();
            assert!(report.starts_with("sqlite\n[\"employees\"]\n[(2,)]\n"));
            assert!(report.contains("System Message"));
            assert!(dir.path().join("graph.mmd").exists());

            app.shutdown().await;
        });
    }

    #[test]
    fn test_startup_rejects_bad_template() {
        smol::block_on(async {
            let mut config = config("sqlite::memory:");
            config.prompt_template_name = "no/such-template".to_string();

            assert!(App::startup(config).await.is_err());
        });
    }

    #[test]
    fn test_anthropic_requires_key() {
        let mut config = config("sqlite::memory:");
        config.provider = LlmProvider::Anthropic {
            api_key: String::new(),
        };
        assert!(build_model(&config).is_err());
    }
}
