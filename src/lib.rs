//! clai - LLM assistant for the command line
//!
//! This library provides the core of the `clai` CLI tool: prompt
//! construction, streaming providers, strict response validation with
//! corrective retries, and the confirmation gate in front of execution.

pub mod cli;
pub mod config;
pub mod context;
pub mod executor;
pub mod gate;
pub mod intent;
pub mod orchestrator;
pub mod output;
pub mod progress;
pub mod prompt;
pub mod providers;
pub mod response;
pub mod validate;

// Re-export commonly used types
pub use cli::Cli;
pub use config::Config;
pub use context::CommandContext;
pub use executor::{CommandOutput, ExecError, Runner};
pub use gate::{Confirm, ExecutionGate, GateOutcome, TerminalConfirm};
pub use intent::{Intent, IntentError, IntentKind};
pub use orchestrator::{
    Orchestrator, QueryError, QueryEvent, QueryObserver, QueryRequest, MAX_RETRIES,
};
pub use providers::{Provider, ProviderConfig, ProviderError, ProviderKind};
pub use response::{CommandAnalysis, FileAnalysis, ResponseEnvelope, ResponseKind};
pub use validate::{validate_response, ValidationError};
