use std::collections::HashMap;
use std::sync::Arc;

use crate::services::agent::{LanguageModel, OutputShape};
use crate::services::database::SchemaMetadata;
use crate::services::prompts::PromptTemplate;

use super::state::{PipelineError, RequestState};

/// Row limit suggested to the model
pub const TOP_K: usize = 10;

/// Shape of the drafter's structured reply: a single `query` string
pub fn query_output_shape() -> OutputShape {
    OutputShape::new("QueryOutput", "Generated SQL query.")
        .required_field("query", "Syntactically valid SQL query.")
}

/// Turns a question into a candidate SQL query.
pub struct QueryDrafter {
    model: Arc<dyn LanguageModel>,
    template: PromptTemplate,
    schema: SchemaMetadata,
}

impl QueryDrafter {
    pub fn new(model: Arc<dyn LanguageModel>, template: PromptTemplate, schema: SchemaMetadata) -> Self {
        Self {
            model,
            template,
            schema,
        }
    }

    pub fn schema(&self) -> &SchemaMetadata {
        &self.schema
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Write `query` into `state`
    pub async fn draft(&self, state: &mut RequestState) -> Result<String, PipelineError> {
        let variables = HashMap::from([
            ("dialect", self.schema.dialect.clone()),
            ("top_k", TOP_K.to_string()),
            ("table_info", self.schema.table_info.clone()),
            ("input", state.question().to_string()),
        ]);
        let prompt = self
            .template
            .render(&variables)
            .map_err(|e| PipelineError::Backend(e.into()))?;
        tracing::debug!("drafting prompt:\n{}", prompt.text());

        let shape = query_output_shape();
        let reply = self.model.complete_structured(&prompt, &shape).await?;
        let fields = shape.validate(&reply)?;

        let query = fields
            .get("query")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if query.is_empty() {
            return Err(PipelineError::ContractViolation(
                "`QueryOutput` returned an empty query".to_string(),
            ));
        }

        tracing::info!(model = self.model.model_name(), "drafted query: {}", query);
        state.record_query(query.clone())?;
        Ok(query)
    }
}
