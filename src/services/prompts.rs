//! Prompt templates for query drafting.
//!
//! A template identifier names either a built-in template or a file. Files
//! hold plain text split into messages by `[system]`, `[human]` and `[ai]`
//! header lines; text without any header is a single system message.
//! Placeholders use `{name}`, and `{{` / `}}` produce literal braces.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use thiserror::Error;

use crate::services::agent::{Prompt, Role};

/// Identifier of the built-in drafting template
pub const DEFAULT_TEMPLATE_NAME: &str = "langchain-ai/sql-query-system-prompt";

/// Placeholders the drafting template must use
pub const QUERY_TEMPLATE_VARIABLES: [&str; 4] = ["dialect", "top_k", "table_info", "input"];

const SQL_QUERY_SYSTEM_PROMPT: &str = "\
Given an input question, create a syntactically correct {dialect} query to run to help find the answer. \
Unless the user specifies in his question a specific number of examples they wish to obtain, always limit \
your query to at most {top_k} results. You can order the results by a relevant column to return the most \
interesting examples in the database.

Never query for all the columns from a specific table, only ask for a the few relevant columns given the question.

Pay attention to use only the column names that you can see in the schema description. Be careful to not \
query for columns that do not exist. Also, pay attention to which column is in which table.

Only use the following tables:
{table_info}

Question: {input}";

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("unknown prompt template `{0}` (not a built-in template or a readable file)")]
    Unknown(String),

    #[error("failed to read prompt template {path}: {message}")]
    Io { path: String, message: String },

    #[error("prompt template `{0}` is empty")]
    Empty(String),

    #[error("prompt template `{name}` must have exactly one message, found {count}")]
    MessageCount { name: String, count: usize },

    #[error("prompt template `{name}` does not use placeholder {{{placeholder}}}")]
    MissingPlaceholder { name: String, placeholder: String },

    #[error("prompt template `{name}` uses unknown placeholder {{{placeholder}}}")]
    UnknownPlaceholder { name: String, placeholder: String },

    #[error("prompt template `{name}` has an unbalanced `{{` or `}}` at byte {offset}")]
    Unbalanced { name: String, offset: usize },

    #[error("no value supplied for placeholder {{{0}}}")]
    MissingVariable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMessage {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub name: String,
    pub messages: Vec<TemplateMessage>,
}

/// A parsed piece of template text
#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Literal(&'a str),
    Brace(char),
    Placeholder(&'a str),
}

impl PromptTemplate {
    /// Resolve a built-in template name, or load a template file
    pub fn resolve(identifier: &str) -> Result<Self, TemplateError> {
        let identifier = identifier.trim();
        if identifier == DEFAULT_TEMPLATE_NAME || identifier == "default" {
            return Self::parse(DEFAULT_TEMPLATE_NAME, SQL_QUERY_SYSTEM_PROMPT);
        }

        let path = Path::new(identifier);
        if path.is_file() {
            let text = std::fs::read_to_string(path).map_err(|e| TemplateError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            return Self::parse(identifier, &text);
        }

        Err(TemplateError::Unknown(identifier.to_string()))
    }

    /// Parse template text into messages
    pub fn parse(name: &str, text: &str) -> Result<Self, TemplateError> {
        let mut messages: Vec<TemplateMessage> = Vec::new();
        let mut role = Role::System;
        let mut buffer: Vec<&str> = Vec::new();
        let mut saw_header = false;

        let mut flush = |role: Role, buffer: &mut Vec<&str>, explicit: bool| {
            let text = buffer.join("\n").trim().to_string();
            buffer.clear();
            if explicit || !text.is_empty() {
                messages.push(TemplateMessage { role, text });
            }
        };

        for line in text.lines() {
            if let Some(next_role) = parse_header(line) {
                flush(role, &mut buffer, saw_header);
                role = next_role;
                saw_header = true;
            } else {
                buffer.push(line);
            }
        }
        flush(role, &mut buffer, saw_header);

        if messages.iter().all(|m| m.text.is_empty()) {
            return Err(TemplateError::Empty(name.to_string()));
        }

        let template = Self {
            name: name.to_string(),
            messages,
        };
        for message in &template.messages {
            segments(&template.name, &message.text)?;
        }
        Ok(template)
    }

    /// Every placeholder used across all messages
    pub fn placeholders(&self) -> BTreeSet<String> {
        self.messages
            .iter()
            .filter_map(|m| segments(&self.name, &m.text).ok())
            .flatten()
            .filter_map(|segment| match segment {
                Segment::Placeholder(name) => Some(name.to_string()),
                _ => None,
            })
            .collect()
    }

    /// Check the template is a single message using exactly `variables`
    pub fn verify(&self, variables: &[&str]) -> Result<(), TemplateError> {
        if self.messages.len() != 1 {
            return Err(TemplateError::MessageCount {
                name: self.name.clone(),
                count: self.messages.len(),
            });
        }

        let used = self.placeholders();
        if let Some(missing) = variables.iter().find(|v| !used.contains(**v)) {
            return Err(TemplateError::MissingPlaceholder {
                name: self.name.clone(),
                placeholder: missing.to_string(),
            });
        }
        if let Some(unknown) = used.iter().find(|p| !variables.contains(&p.as_str())) {
            return Err(TemplateError::UnknownPlaceholder {
                name: self.name.clone(),
                placeholder: unknown.clone(),
            });
        }

        Ok(())
    }

    /// Substitute `variables` into every message
    pub fn render(&self, variables: &HashMap<&str, String>) -> Result<Prompt, TemplateError> {
        let mut prompt = Prompt::default();

        for message in &self.messages {
            let mut text = String::with_capacity(message.text.len());
            for segment in segments(&self.name, &message.text)? {
                match segment {
                    Segment::Literal(s) => text.push_str(s),
                    Segment::Brace(c) => text.push(c),
                    Segment::Placeholder(name) => {
                        let value = variables
                            .get(name)
                            .ok_or_else(|| TemplateError::MissingVariable(name.to_string()))?;
                        text.push_str(value);
                    }
                }
            }
            prompt = prompt.with_message(message.role, text);
        }

        Ok(prompt)
    }

    /// Human-readable dump of the template, one banner per message
    pub fn pretty(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let title = match m.role {
                    Role::System => " System Message ",
                    Role::User => " Human Message ",
                    Role::Assistant => " Ai Message ",
                };
                format!("{:=^80}\n\n{}", title, m.text)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn parse_header(line: &str) -> Option<Role> {
    match line.trim().to_lowercase().as_str() {
        "[system]" => Some(Role::System),
        "[human]" | "[user]" => Some(Role::User),
        "[ai]" | "[assistant]" => Some(Role::Assistant),
        _ => None,
    }
}

fn segments<'a>(name: &str, text: &'a str) -> Result<Vec<Segment<'a>>, TemplateError> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    let unbalanced = |offset| TemplateError::Unbalanced {
        name: name.to_string(),
        offset,
    };

    while i < bytes.len() {
        match bytes[i] {
            b'{' | b'}' if bytes.get(i + 1) == Some(&bytes[i]) => {
                if literal_start < i {
                    out.push(Segment::Literal(&text[literal_start..i]));
                }
                out.push(Segment::Brace(bytes[i] as char));
                i += 2;
                literal_start = i;
            }
            b'{' => {
                let close = text[i + 1..].find('}').ok_or_else(|| unbalanced(i))? + i + 1;
                let placeholder = &text[i + 1..close];
                if !is_identifier(placeholder) {
                    return Err(unbalanced(i));
                }
                if literal_start < i {
                    out.push(Segment::Literal(&text[literal_start..i]));
                }
                out.push(Segment::Placeholder(placeholder));
                i = close + 1;
                literal_start = i;
            }
            b'}' => return Err(unbalanced(i)),
            _ => i += 1,
        }
    }

    if literal_start < bytes.len() {
        out.push(Segment::Literal(&text[literal_start..]));
    }
    Ok(out)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
