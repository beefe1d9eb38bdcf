use std::sync::Arc;

use crate::services::database::{SqlBackend, is_select_query, run_query_tool};

use super::state::{PipelineError, RequestState};

/// Runs an approved query against the data store.
pub struct QueryExecutor {
    backend: Arc<dyn SqlBackend>,
}

impl QueryExecutor {
    pub fn new(backend: Arc<dyn SqlBackend>) -> Self {
        Self { backend }
    }

    /// Write `result` into `state`. Backend failures become the result text.
    pub async fn execute(&self, state: &mut RequestState) -> Result<String, PipelineError> {
        let query = state.require_query("execute")?.to_string();

        if !is_select_query(&query) {
            tracing::warn!("executing a statement that may modify data: {}", query);
        }

        let result = run_query_tool(self.backend.as_ref(), &query).await;
        tracing::info!("query result: {}", result);

        state.record_result(result.clone())?;
        Ok(result)
    }
}
