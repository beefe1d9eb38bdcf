//! Declarative output shapes for structured generation.
//!
//! A shape is sent to the backend as a JSON schema, and the backend's reply
//! is checked against it locally. Backends are never trusted to honour the
//! schema on their own.

use serde_json::{Map, Value, json};
use thiserror::Error;

/// The reply of a structured call did not match the requested shape
#[derive(Debug, Error, PartialEq)]
pub enum ShapeError {
    #[error("expected a JSON object for `{shape}`, got: {got}")]
    NotAnObject { shape: String, got: String },

    #[error("`{shape}` is missing required field `{field}`")]
    MissingField { shape: String, field: String },

    #[error("`{shape}` field `{field}` must be a string")]
    NotAString { shape: String, field: String },
}

/// A single string field of an output shape
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
    pub required: bool,
}

/// The shape a structured generation call must return
#[derive(Debug, Clone, PartialEq)]
pub struct OutputShape {
    pub name: String,
    pub description: String,
    pub fields: Vec<FieldSpec>,
}

impl OutputShape {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            fields: Vec::new(),
        }
    }

    pub fn required_field(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            description: description.into(),
            required: true,
        });
        self
    }

    /// JSON schema sent to the backend
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            properties.insert(
                field.name.clone(),
                json!({
                    "type": "string",
                    "description": field.description,
                }),
            );
        }

        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check a backend reply against this shape and return its fields
    pub fn validate(&self, value: &Value) -> Result<Map<String, Value>, ShapeError> {
        let object = value.as_object().ok_or_else(|| ShapeError::NotAnObject {
            shape: self.name.clone(),
            got: value.to_string(),
        })?;

        for field in &self.fields {
            match object.get(&field.name) {
                Some(Value::String(_)) => {}
                Some(Value::Null) | None if !field.required => {}
                Some(Value::Null) | None => {
                    return Err(ShapeError::MissingField {
                        shape: self.name.clone(),
                        field: field.name.clone(),
                    });
                }
                Some(_) => {
                    return Err(ShapeError::NotAString {
                        shape: self.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
        }

        Ok(object.clone())
    }
}

/// Parse a model's text reply as JSON, tolerating a surrounding markdown fence
pub fn parse_json_reply(text: &str) -> Result<Value, serde_json::Error> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(unfenced.trim())
}
