use anyhow::{Context, Result};
use async_trait::async_trait;

use super::types::SchemaMetadata;

/// A data store the pipeline can describe to the model and run queries on.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    /// Dialect name, e.g. `sqlite` or `postgresql`
    fn dialect(&self) -> &str;

    async fn usable_table_names(&self) -> Result<Vec<String>>;

    /// `CREATE TABLE` statements plus sample rows for `tables`,
    /// or for every usable table when `None`
    async fn table_info(&self, tables: Option<&[String]>) -> Result<String>;

    /// Run `sql` verbatim and render the returned rows as text
    async fn execute(&self, sql: &str) -> Result<String>;

    /// Release connections; the backend is unusable afterwards
    async fn close(&self) {}
}

/// Run a query the way the execution tool does: backend errors come back
/// as `Error: ...` text instead of failing the call.
pub async fn run_query_tool(backend: &dyn SqlBackend, sql: &str) -> String {
    match backend.execute(sql).await {
        Ok(result) => result,
        Err(e) => {
            tracing::info!("query failed, returning error text: {}", e);
            format!("Error: {}", e)
        }
    }
}

impl SchemaMetadata {
    /// Fetch dialect, table names and table info from `backend`
    pub async fn load(backend: &dyn SqlBackend) -> Result<Self> {
        let table_names = backend
            .usable_table_names()
            .await
            .context("Failed to list usable tables")?;
        let table_info = backend
            .table_info(None)
            .await
            .context("Failed to describe tables")?;

        Ok(Self {
            dialect: backend.dialect().to_string(),
            table_names,
            table_info,
        })
    }
}
