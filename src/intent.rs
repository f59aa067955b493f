//! Resolved user request.
//!
//! An [`Intent`] is built once per invocation by the command line layer and is
//! read-only afterwards.

use std::path::{Path, PathBuf};

use crate::response::ResponseKind;

/// What the user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentKind {
    /// Run this command and diagnose the result
    Command(String),
    /// Analyze a file
    File { path: PathBuf, content: String },
    /// Free-form question
    Ask(String),
}

/// Errors raised while resolving an intent
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    #[error("Empty command provided")]
    EmptyCommand,

    #[error("Empty question provided")]
    EmptyQuestion,

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("File is empty: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("File is not valid UTF-8 text: {}", .0.display())]
    NotText(PathBuf),

    #[error("Could not read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A fully resolved request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub kind: IntentKind,
    /// Extra context from `--prompt`
    pub user_prompt: Option<String>,
    /// Model override from `--model`
    pub model: Option<String>,
    pub verbose: bool,
}

impl Intent {
    fn from_kind(kind: IntentKind) -> Self {
        Self {
            kind,
            user_prompt: None,
            model: None,
            verbose: false,
        }
    }

    pub fn command(command: impl Into<String>) -> Result<Self, IntentError> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(IntentError::EmptyCommand);
        }
        Ok(Self::from_kind(IntentKind::Command(command.trim().to_string())))
    }

    pub fn ask(question: impl Into<String>) -> Result<Self, IntentError> {
        let question = question.into();
        if question.trim().is_empty() {
            return Err(IntentError::EmptyQuestion);
        }
        Ok(Self::from_kind(IntentKind::Ask(question)))
    }

    /// Read `path` for analysis. Empty files are rejected here so they never
    /// reach the model.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IntentError> {
        let path = path.as_ref().to_path_buf();
        let bytes = std::fs::read(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                IntentError::FileNotFound(path.clone())
            } else {
                IntentError::Read {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        Self::from_file_content(path, bytes)
    }

    /// Build a file intent from already loaded bytes
    pub fn from_file_content(path: PathBuf, bytes: Vec<u8>) -> Result<Self, IntentError> {
        if bytes.is_empty() {
            return Err(IntentError::EmptyFile(path));
        }
        let content = String::from_utf8(bytes).map_err(|_| IntentError::NotText(path.clone()))?;
        Ok(Self::from_kind(IntentKind::File { path, content }))
    }

    /// Builder: attach a custom prompt (blank prompts are ignored)
    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.user_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    /// Builder: override the configured model
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model.filter(|m| !m.trim().is_empty());
        self
    }

    /// Builder: set verbose mode
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// The response shape this intent expects back
    pub fn response_kind(&self) -> ResponseKind {
        match self.kind {
            IntentKind::Command(_) => ResponseKind::Command,
            IntentKind::File { .. } => ResponseKind::File,
            IntentKind::Ask(_) => ResponseKind::Ask,
        }
    }
}
