//! Agent client for communicating with the Anthropic API.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::LanguageModel;
use super::shape::OutputShape;
use super::types::{ContentBlock, Message, Prompt, Role, ToolChoice, ToolDefinition};

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Stateless client for the Anthropic messages API
#[derive(Clone)]
pub struct AnthropicClient {
    api_key: String,
    model: String,
    max_tokens: u32,
    endpoint: String,
}

// Anthropic API request/response types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

impl AnthropicClient {
    pub fn builder() -> AnthropicClientBuilder {
        AnthropicClientBuilder::default()
    }

    fn build_request(
        &self,
        prompt: &Prompt,
        tools: Option<Vec<ToolDefinition>>,
        tool_choice: Option<ToolChoice>,
    ) -> AnthropicRequest {
        let mut messages: Vec<Message> = prompt
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| Message {
                role: m.role.as_str().to_string(),
                content: vec![ContentBlock::Text {
                    text: m.content.clone(),
                }],
            })
            .collect();

        let mut system = prompt.system_text();

        // The API needs at least one user turn; a system-only prompt becomes one
        if messages.is_empty() {
            messages.push(Message {
                role: Role::User.as_str().to_string(),
                content: vec![ContentBlock::Text {
                    text: system.take().unwrap_or_default(),
                }],
            });
        }

        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages,
            system,
            tools,
            tool_choice,
        }
    }

    async fn send(&self, request: AnthropicRequest) -> Result<AnthropicResponse> {
        let body = serde_json::to_string(&request)
            .map_err(|e| anyhow!("Failed to serialize request: {}", e))?;
        let api_key = self.api_key.clone();
        let endpoint = self.endpoint.clone();

        // smolhttp is synchronous
        let response_text = smol::unblock(move || -> Result<String> {
            let response = smolhttp::Client::new(&endpoint)
                .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?
                .post()
                .headers(vec![
                    ("x-api-key".to_string(), api_key),
                    ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
                    ("content-type".to_string(), "application/json".to_string()),
                ])
                .body(body.into())
                .send()
                .map_err(|e| anyhow!("API request failed: {}", e))?;

            Ok(response.text())
        })
        .await?;

        parse_response(&response_text)
    }
}

fn parse_response(response_text: &str) -> Result<AnthropicResponse> {
    if let Ok(error) = serde_json::from_str::<AnthropicErrorBody>(response_text) {
        return Err(anyhow!(
            "API error ({}): {}",
            error.error.error_type,
            error.error.message
        ));
    }

    let api_response: AnthropicResponse = serde_json::from_str(response_text).map_err(|e| {
        anyhow!(
            "Failed to parse response: {}. Response: {}",
            e,
            response_text
        )
    })?;

    tracing::debug!(
        model = %api_response.model,
        stop_reason = ?api_response.stop_reason,
        input_tokens = api_response.usage.input_tokens,
        output_tokens = api_response.usage.output_tokens,
        "anthropic response"
    );

    Ok(api_response)
}

fn collect_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::ToolUse { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let request = self.build_request(prompt, None, None);
        let response = self.send(request).await?;

        let text = collect_text(&response.content);
        if text.is_empty() {
            return Err(anyhow!("No text in assistant response"));
        }
        Ok(text)
    }

    async fn complete_structured(&self, prompt: &Prompt, shape: &OutputShape) -> Result<Value> {
        let tool = ToolDefinition {
            name: shape.name.clone(),
            description: shape.description.clone(),
            input_schema: shape.json_schema(),
        };
        let request = self.build_request(
            prompt,
            Some(vec![tool]),
            Some(ToolChoice::tool(shape.name.clone())),
        );
        let response = self.send(request).await?;

        response
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::ToolUse { name, input, .. } if name == shape.name => Some(input),
                _ => None,
            })
            .ok_or_else(|| anyhow!("Assistant response did not call `{}`", shape.name))
    }
}

/// Builder for creating clients with custom configuration
pub struct AnthropicClientBuilder {
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    endpoint: String,
}

impl Default for AnthropicClientBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-haiku-4-5-20251001".to_string(),
            max_tokens: 4096,
            endpoint: ANTHROPIC_MESSAGES_URL.to_string(),
        }
    }
}

impl AnthropicClientBuilder {
    pub fn api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn build(self) -> Result<AnthropicClient> {
        let api_key = self
            .api_key
            .filter(|key| !key.is_empty())
            .ok_or_else(|| anyhow!("ANTHROPIC_API_KEY is required for the anthropic provider"))?;

        Ok(AnthropicClient {
            api_key,
            model: self.model,
            max_tokens: self.max_tokens,
            endpoint: self.endpoint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::agent::types::Role;

    fn client() -> AnthropicClient {
        AnthropicClient::builder()
            .api_key("test-key".to_string())
            .model("claude-sonnet-4-5".to_string())
            .max_tokens(2048)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_api_key() {
        assert!(AnthropicClient::builder().build().is_err());
        assert!(
            AnthropicClient::builder()
                .api_key(String::new())
                .build()
                .is_err()
        );
        assert_eq!(client().model_name(), "claude-sonnet-4-5");
    }

    #[test]
    fn test_system_only_prompt_becomes_user_turn() {
        let prompt = Prompt::default().with_message(Role::System, "Write SQL for: cats");
        let request = client().build_request(&prompt, None, None);

        assert!(request.system.is_none());
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, "user");
    }

    #[test]
    fn test_structured_request_forces_tool() {
        let shape = OutputShape::new("QueryOutput", "Generated SQL query.")
            .required_field("query", "Syntactically valid SQL query.");
        let prompt = Prompt::default()
            .with_message(Role::System, "You write SQL.")
            .with_message(Role::User, "How many cats?");
        let tool = ToolDefinition {
            name: shape.name.clone(),
            description: shape.description.clone(),
            input_schema: shape.json_schema(),
        };
        let request =
            client().build_request(&prompt, Some(vec![tool]), Some(ToolChoice::tool("QueryOutput")));

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["system"], "You write SQL.");
        assert_eq!(body["tool_choice"]["type"], "tool");
        assert_eq!(body["tool_choice"]["name"], "QueryOutput");
        assert_eq!(body["tools"][0]["input_schema"]["required"][0], "query");
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
    }

    #[test]
    fn test_parse_response_surfaces_api_errors() {
        let err = parse_response(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("overloaded_error"));
    }

    #[test]
    fn test_parse_response_reads_tool_use() {
        let response = parse_response(
            r#"{
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "model": "claude-sonnet-4-5",
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 10, "output_tokens": 5},
                "content": [
                    {"type": "text", "text": "Here you go"},
                    {"type": "tool_use", "id": "tu_1", "name": "QueryOutput", "input": {"query": "SELECT 1"}}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(collect_text(&response.content), "Here you go");
        assert!(matches!(
            &response.content[1],
            ContentBlock::ToolUse { input, .. } if input["query"] == "SELECT 1"
        ));
    }
}
