use std::sync::Arc;

use crate::services::agent::{LanguageModel, Prompt};

use super::state::{PipelineError, RequestState};

/// Summarizes the query result as a natural-language answer.
pub struct AnswerComposer {
    model: Arc<dyn LanguageModel>,
}

pub fn answer_prompt(question: &str, query: &str, result: &str) -> String {
    format!(
        "Given the following user question, corresponding SQL query, \
         and SQL result, answer the user question.\n\n\
         Question: {}\n\
         SQL Query: {}\n\
         SQL Result: {}",
        question, query, result
    )
}

impl AnswerComposer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Write `answer` into `state`
    pub async fn compose(&self, state: &mut RequestState) -> Result<String, PipelineError> {
        let query = state.require_query("answer")?;
        let result = state.require_result("answer")?;
        let prompt = Prompt::user(answer_prompt(state.question(), query, result));

        let answer = self.model.complete(&prompt).await?;
        tracing::info!(model = self.model.model_name(), "composed answer");

        state.record_answer(answer.clone())?;
        Ok(answer)
    }
}
