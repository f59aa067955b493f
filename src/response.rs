//! Structured results produced by a validated model response.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which response contract a request expects from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// JSON object with `corrected_command`
    Command,
    /// JSON object with `file_type`
    File,
    /// Free-form markdown, never parsed
    Ask,
}

impl ResponseKind {
    /// Whether responses of this kind go through the validator
    pub fn is_structured(self) -> bool {
        !matches!(self, ResponseKind::Ask)
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseKind::Command => write!(f, "command"),
            ResponseKind::File => write!(f, "file"),
            ResponseKind::Ask => write!(f, "ask"),
        }
    }
}

/// Diagnosis of a failed (or questionable) shell command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandAnalysis {
    pub description: String,
    pub possible_fixes: Vec<String>,
    pub corrected_command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Review of a file's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileAnalysis {
    pub file_type: String,
    pub summary: String,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub security_analysis: String,
}

/// The single result of one analysis request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "result", rename_all = "lowercase")]
pub enum ResponseEnvelope {
    Command(CommandAnalysis),
    File(FileAnalysis),
    Text(String),
}

impl ResponseEnvelope {
    pub fn kind(&self) -> ResponseKind {
        match self {
            ResponseEnvelope::Command(_) => ResponseKind::Command,
            ResponseEnvelope::File(_) => ResponseKind::File,
            ResponseEnvelope::Text(_) => ResponseKind::Ask,
        }
    }

    pub fn as_command(&self) -> Option<&CommandAnalysis> {
        match self {
            ResponseEnvelope::Command(analysis) => Some(analysis),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileAnalysis> {
        match self {
            ResponseEnvelope::File(analysis) => Some(analysis),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseEnvelope::Text(text) => Some(text),
            _ => None,
        }
    }
}
