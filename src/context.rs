//! Command context for prompt construction.
//!
//! This module captures what happened when a command ran (output, exit code)
//! together with the environment it ran in, so the model gets enough
//! information to propose a fix.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::executor::CommandOutput;

/// Shell dialect guessed from the wording of error output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShellDialect {
    Bash,
    Zsh,
    PowerShell,
    Cmd,
    #[default]
    Posix,
}

impl fmt::Display for ShellDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellDialect::Bash => write!(f, "bash"),
            ShellDialect::Zsh => write!(f, "zsh"),
            ShellDialect::PowerShell => write!(f, "powershell"),
            ShellDialect::Cmd => write!(f, "cmd"),
            ShellDialect::Posix => write!(f, "posix sh"),
        }
    }
}

/// Guess the shell from characteristic stderr wording.
pub fn detect_shell_dialect(stderr: &str) -> ShellDialect {
    let lower = stderr.to_lowercase();

    if lower.contains("zsh:") {
        ShellDialect::Zsh
    } else if lower.contains("bash:") {
        ShellDialect::Bash
    } else if lower.contains("is not recognized as the name of a cmdlet")
        || lower.contains("commandnotfoundexception")
        || lower.contains("+ categoryinfo")
    {
        ShellDialect::PowerShell
    } else if lower.contains("is not recognized as an internal or external command") {
        ShellDialect::Cmd
    } else {
        ShellDialect::Posix
    }
}

/// Context from a command execution
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CommandContext {
    /// The command that was executed
    pub command: String,

    /// Exit code, if the process exited normally
    pub exit_code: Option<i32>,

    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,

    /// Working directory where the command was run
    pub working_dir: Option<String>,

    /// Shell dialect detected from stderr
    pub shell: ShellDialect,

    /// Login name of the invoking user
    pub user: Option<String>,

    /// Operating system family (`linux`, `macos`, `windows`, ...)
    pub os: String,

    /// UTC timestamp in RFC 3339 form
    pub timestamp: String,
}

impl CommandContext {
    /// Create context for a command, capturing the current environment
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
        .with_environment()
    }

    /// Build context from a finished run
    pub fn from_output(output: &CommandOutput) -> Self {
        let mut ctx = Self::new(output.command.clone())
            .stdout(output.stdout.clone())
            .stderr(output.stderr.clone());
        ctx.exit_code = output.exit_code;
        ctx
    }

    /// Builder: set exit code
    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Builder: set stdout
    pub fn stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Builder: set stderr, re-detecting the shell dialect
    pub fn stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self.shell = detect_shell_dialect(&self.stderr);
        self
    }

    /// Fill in working directory, user, OS and timestamp
    pub fn with_environment(mut self) -> Self {
        self.working_dir = std::env::current_dir()
            .ok()
            .map(|p| p.display().to_string());
        self.user = current_user();
        self.os = std::env::consts::OS.to_string();
        self.timestamp = utc_timestamp();
        self
    }

    /// Human-readable meaning of the exit code
    pub fn exit_status_text(&self) -> String {
        match self.exit_code {
            Some(code) => format!("{} ({})", code, interpret_exit_code(code)),
            None => "none (terminated by signal)".to_string(),
        }
    }
}

/// Current UTC time in RFC 3339 form with second precision
pub fn utc_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Login name from the environment
pub fn current_user() -> Option<String> {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
}

/// Interpret common exit codes
pub fn interpret_exit_code(code: i32) -> &'static str {
    match code {
        0 => "success",
        1 => "general error",
        2 => "misuse of shell command",
        126 => "permission problem or command not executable",
        127 => "command not found",
        130 => "terminated by Ctrl+C (SIGINT)",
        137 => "killed (SIGKILL)",
        139 => "segmentation fault (SIGSEGV)",
        143 => "terminated (SIGTERM)",
        _ if code > 128 && code < 256 => "terminated by signal",
        _ => "unknown",
    }
}
