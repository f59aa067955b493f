//! Command-line interface definitions for `clai`.

use clap::{ArgGroup, Parser};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::intent::{Intent, IntentError};
use crate::providers::ProviderKind;

/// Diagnose shell commands, review files, and answer questions with an LLM
#[derive(Parser, Debug)]
#[command(
    name = "clai",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CLAI_GIT_SHA"), ")"),
    about,
    long_about = None
)]
#[command(
    after_help = "EXAMPLES:\n    clai gti status\n    clai -c \"docker compose up\" -p \"the stack uses podman\"\n    clai -f nginx.conf\n    clai -a \"how do I find large files?\"\n    clai --provider openai --json npm test"
)]
#[command(group(
    ArgGroup::new("source")
        .args(["args", "command", "file", "ask"])
        .multiple(false)
))]
pub struct Cli {
    /// Command to run and diagnose
    #[arg(trailing_var_arg = true, value_name = "COMMAND")]
    pub args: Vec<String>,

    /// Command to run and diagnose, as one string
    #[arg(long, short = 'c', value_name = "CMD")]
    pub command: Option<String>,

    /// File to review
    #[arg(long, short = 'f', value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Ask a free-form question
    #[arg(long, short = 'a', value_name = "QUESTION")]
    pub ask: Option<String>,

    /// Extra context for the model (kept apart from the required format)
    #[arg(long, short = 'p', value_name = "TEXT")]
    pub prompt: Option<String>,

    /// Model to use (overrides config and CLAI_MODEL)
    #[arg(long, short = 'm', value_name = "NAME")]
    pub model: Option<String>,

    /// Provider to use (overrides config and CLAI_PROVIDER)
    #[arg(long, value_enum, value_name = "KIND")]
    pub provider: Option<ProviderKind>,

    /// Show the prompt, raw model output, and debug logs
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Print the validated response as JSON and do not offer to run anything
    #[arg(long, short = 'j')]
    pub json: bool,

    /// Check that the configured provider is reachable and exit
    #[arg(long)]
    pub check: bool,

    /// List providers and whether their API key is set
    #[arg(long)]
    pub list_providers: bool,

    /// Output the default configuration to stdout
    #[arg(long)]
    pub print_config: bool,

    /// Generate shell completions
    #[arg(long, value_enum, value_name = "SHELL")]
    pub completions: Option<Shell>,
}

impl Cli {
    /// The command line to run, if one was given.
    ///
    /// A single positional argument is taken as a complete command line;
    /// several are re-quoted so arguments containing spaces survive.
    pub fn command_line(&self) -> Option<String> {
        if let Some(command) = &self.command {
            return Some(command.clone());
        }
        match self.args.as_slice() {
            [] => None,
            [single] => Some(single.clone()),
            many => Some(
                shlex::try_join(many.iter().map(String::as_str))
                    .unwrap_or_else(|_| many.join(" ")),
            ),
        }
    }

    /// Whether any input source was given
    pub fn has_source(&self) -> bool {
        !self.args.is_empty() || self.command.is_some() || self.file.is_some() || self.ask.is_some()
    }

    /// Resolve the request. `Ok(None)` means no source was given.
    pub fn to_intent(&self) -> Result<Option<Intent>, IntentError> {
        let intent = if let Some(path) = &self.file {
            Intent::from_file(path)?
        } else if let Some(question) = &self.ask {
            Intent::ask(question.clone())?
        } else if let Some(command) = self.command_line() {
            Intent::command(command)?
        } else {
            return Ok(None);
        };

        Ok(Some(
            intent
                .with_prompt(self.prompt.clone())
                .with_model(self.model.clone())
                .verbose(self.verbose),
        ))
    }
}
