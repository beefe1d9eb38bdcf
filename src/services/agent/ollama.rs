//! Client for a local Ollama server's chat endpoint.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::LanguageModel;
use super::shape::{OutputShape, parse_json_reply};
use super::types::{Prompt, PromptMessage};

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

#[derive(Clone)]
pub struct OllamaClient {
    host: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

impl OllamaClient {
    pub fn new(host: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.host)
    }

    fn request_body(&self, prompt: &Prompt, format: Option<Value>) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: &prompt.messages,
            stream: false,
            format,
        };
        serde_json::to_string(&request).map_err(|e| anyhow!("Failed to serialize request: {}", e))
    }

    async fn chat(&self, body: String) -> Result<String> {
        let url = self.chat_url();

        let response_text = smol::unblock(move || -> Result<String> {
            let response = smolhttp::Client::new(&url)
                .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?
                .post()
                .headers(vec![(
                    "content-type".to_string(),
                    "application/json".to_string(),
                )])
                .body(body.into())
                .send()
                .map_err(|e| anyhow!("Ollama request failed: {}", e))?;

            Ok(response.text())
        })
        .await?;

        parse_chat_response(&response_text)
    }
}

fn parse_chat_response(response_text: &str) -> Result<String> {
    if let Ok(error) = serde_json::from_str::<OllamaError>(response_text) {
        return Err(anyhow!("Ollama error: {}", error.error));
    }

    let response: ChatResponse = serde_json::from_str(response_text).map_err(|e| {
        anyhow!(
            "Failed to parse Ollama response: {}. Response: {}",
            e,
            response_text
        )
    })?;

    tracing::debug!(eval_count = ?response.eval_count, "ollama response");
    Ok(response.message.content)
}

#[async_trait]
impl LanguageModel for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let body = self.request_body(prompt, None)?;
        self.chat(body).await
    }

    async fn complete_structured(&self, prompt: &Prompt, shape: &OutputShape) -> Result<Value> {
        let body = self.request_body(prompt, Some(shape.json_schema()))?;
        let content = self.chat(body).await?;

        parse_json_reply(&content)
            .map_err(|e| anyhow!("Model reply for `{}` is not JSON: {}. Reply: {}", shape.name, e, content))
    }
}
