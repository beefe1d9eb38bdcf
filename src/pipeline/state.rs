//! The per-session record threaded through the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::services::agent::ShapeError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("`{field}` must be written before the {stage} stage runs")]
    MissingField {
        field: &'static str,
        stage: &'static str,
    },

    #[error("`{0}` was already written and cannot be overwritten")]
    AlreadyWritten(&'static str),

    #[error("backend broke its output contract: {0}")]
    ContractViolation(String),

    #[error("cannot {action} a session at stage {stage}")]
    InvalidTransition { stage: Stage, action: &'static str },

    #[error("no session found for thread `{0}`")]
    SessionNotFound(String),

    #[error("checkpoint for thread `{thread_id}` is unreadable: {message}")]
    CorruptCheckpoint { thread_id: String, message: String },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<ShapeError> for PipelineError {
    fn from(e: ShapeError) -> Self {
        PipelineError::ContractViolation(e.to_string())
    }
}

/// Pipeline position of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    /// Suspended, waiting for the reviewer
    Drafted,
    Executed,
    Answered,
    Cancelled,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::Drafted => "drafted",
            Stage::Executed => "executed",
            Stage::Answered => "answered",
            Stage::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Stage::Start),
            "drafted" => Some(Stage::Drafted),
            "executed" => Some(Stage::Executed),
            "answered" => Some(Stage::Answered),
            "cancelled" => Some(Stage::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Answered | Stage::Cancelled)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

/// Question, query, result and answer of one request.
///
/// Every optional field is written at most once, by the stage that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestState {
    question: String,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    answer: Option<String>,
}

impl RequestState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            query: None,
            result: None,
            answer: None,
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }

    pub(crate) fn require_query(&self, stage: &'static str) -> Result<&str, PipelineError> {
        self.query().ok_or(PipelineError::MissingField {
            field: "query",
            stage,
        })
    }

    pub(crate) fn require_result(&self, stage: &'static str) -> Result<&str, PipelineError> {
        self.result().ok_or(PipelineError::MissingField {
            field: "result",
            stage,
        })
    }

    pub(crate) fn record_query(&mut self, query: String) -> Result<(), PipelineError> {
        write_once(&mut self.query, "query", query)
    }

    pub(crate) fn record_result(&mut self, result: String) -> Result<(), PipelineError> {
        write_once(&mut self.result, "result", result)
    }

    pub(crate) fn record_answer(&mut self, answer: String) -> Result<(), PipelineError> {
        write_once(&mut self.answer, "answer", answer)
    }
}

fn write_once(slot: &mut Option<String>, field: &'static str, value: String) -> Result<(), PipelineError> {
    if slot.is_some() {
        return Err(PipelineError::AlreadyWritten(field));
    }
    *slot = Some(value);
    Ok(())
}

/// What a single stage transition wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepUpdate {
    Drafted { query: String },
    Executed { result: String },
    Answered { answer: String },
    Cancelled,
}

impl fmt::Display for StepUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepUpdate::Drafted { query } => write!(f, "{{'write_query': {{'query': {:?}}}}}", query),
            StepUpdate::Executed { result } => {
                write!(f, "{{'execute_query': {{'result': {:?}}}}}", result)
            }
            StepUpdate::Answered { answer } => {
                write!(f, "{{'generate_answer': {{'answer': {:?}}}}}", answer)
            }
            StepUpdate::Cancelled => f.write_str("{'cancelled': {}}"),
        }
    }
}
