//! Recording stand-ins for the model and data-store backends.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

use crate::services::agent::{LanguageModel, OutputShape, Prompt};
use crate::services::database::{SchemaMetadata, SqlBackend};

pub(crate) fn employees_schema() -> SchemaMetadata {
    SchemaMetadata {
        dialect: "sqlite".to_string(),
        table_names: vec!["employees".to_string()],
        table_info: "CREATE TABLE employees (id INTEGER PRIMARY KEY, name TEXT)".to_string(),
    }
}

#[derive(Default)]
pub(crate) struct StubModel {
    structured_reply: Option<Value>,
    text_reply: Option<String>,
    failure: Option<String>,
    structured_prompts: Mutex<Vec<String>>,
    text_prompts: Mutex<Vec<String>>,
}

impl StubModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn structured(mut self, reply: Value) -> Self {
        self.structured_reply = Some(reply);
        self
    }

    pub fn text(mut self, reply: &str) -> Self {
        self.text_reply = Some(reply.to_string());
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn structured_prompts(&self) -> Vec<String> {
        self.structured_prompts.lock().unwrap().clone()
    }

    pub fn text_prompts(&self) -> Vec<String> {
        self.text_prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        self.text_prompts.lock().unwrap().push(prompt.text());
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        self.text_reply
            .clone()
            .ok_or_else(|| anyhow!("no text reply configured"))
    }

    async fn complete_structured(&self, prompt: &Prompt, _shape: &OutputShape) -> Result<Value> {
        self.structured_prompts.lock().unwrap().push(prompt.text());
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        self.structured_reply
            .clone()
            .ok_or_else(|| anyhow!("no structured reply configured"))
    }
}

pub(crate) struct StubBackend {
    reply: std::result::Result<String, String>,
    executed: Mutex<Vec<String>>,
}

impl StubBackend {
    pub fn returning(result: &str) -> Self {
        Self {
            reply: Ok(result.to_string()),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlBackend for StubBackend {
    fn dialect(&self) -> &str {
        "sqlite"
    }

    async fn usable_table_names(&self) -> Result<Vec<String>> {
        Ok(employees_schema().table_names)
    }

    async fn table_info(&self, _tables: Option<&[String]>) -> Result<String> {
        Ok(employees_schema().table_info)
    }

    async fn execute(&self, sql: &str) -> Result<String> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.reply.clone().map_err(|message| anyhow!("{}", message))
    }
}
