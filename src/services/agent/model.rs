use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::shape::OutputShape;
use super::types::Prompt;

/// A text-generation backend.
///
/// `complete_structured` asks the backend for a reply shaped like `shape`
/// and returns whatever JSON it produced; callers validate it with
/// [`OutputShape::validate`].
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, for logs
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &Prompt) -> Result<String>;

    async fn complete_structured(&self, prompt: &Prompt, shape: &OutputShape) -> Result<Value>;
}
