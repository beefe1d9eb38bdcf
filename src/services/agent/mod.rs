//! Agent module for LLM-powered query drafting and answering.
//!
//! This module provides:
//! - `model` - The `LanguageModel` trait every backend implements
//! - `client` - The Anthropic messages API backend
//! - `ollama` - The local Ollama backend
//! - `shape` - Output shapes for structured generation and their validator
//! - `types` - Core types like Prompt, Message, ContentBlock

mod client;
mod model;
mod ollama;
mod shape;
mod types;

pub use client::{AnthropicClient, AnthropicClientBuilder};
pub use model::LanguageModel;
pub use ollama::{DEFAULT_OLLAMA_HOST, OllamaClient};
pub use shape::{FieldSpec, OutputShape, ShapeError, parse_json_reply};
pub use types::{ContentBlock, Message, Prompt, PromptMessage, Role, ToolChoice, ToolDefinition};
