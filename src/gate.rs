//! Execution gate.
//!
//! Nothing the model suggests runs without an explicit yes from the user.

use std::io::{self, Write};
use std::time::Duration;

use async_trait::async_trait;
use colored::Colorize;

use crate::executor::{CommandOutput, ExecError, Runner, WATCHDOG_INTERVAL};
use crate::response::CommandAnalysis;

/// Source of yes/no answers.
///
/// An `Err` of kind [`io::ErrorKind::Interrupted`] means the user pressed
/// Ctrl-C while being asked.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, question: &str) -> io::Result<bool>;
}

/// Asks on the terminal and reads the answer from stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConfirm;

/// `y` / `yes` in any case; anything else is a no.
pub fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl Confirm for TerminalConfirm {
    async fn confirm(&self, question: &str) -> io::Result<bool> {
        print!("{} {} ", question.bold(), "[y/N]".dimmed());
        io::stdout().flush()?;

        let read = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            io::stdin().read_line(&mut line).map(|n| (n, line))
        });

        tokio::select! {
            result = read => {
                let (n, line) = result.map_err(io::Error::other)??;
                // EOF on stdin counts as "no"
                Ok(n > 0 && parse_answer(&line))
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"))
            }
        }
    }
}

/// What happened at the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// The user said no; nothing ran
    Declined,
    /// The command ran; a non-zero exit is still an `Executed`
    Executed(CommandOutput),
    /// The command could not be started (bad quoting, missing program)
    Failed(String),
}

/// Confirms and runs a suggested command
pub struct ExecutionGate<'a> {
    confirm: &'a dyn Confirm,
    echo: bool,
    watchdog: Duration,
}

impl<'a> ExecutionGate<'a> {
    pub fn new(confirm: &'a dyn Confirm) -> Self {
        Self {
            confirm,
            echo: true,
            watchdog: WATCHDOG_INTERVAL,
        }
    }

    /// Builder: mirror the child's output to the terminal
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Builder: change the watchdog interval
    pub fn watchdog(mut self, interval: Duration) -> Self {
        self.watchdog = interval;
        self
    }

    /// Ask to run `analysis.corrected_command` and run it on yes.
    ///
    /// Only Ctrl-C and confirmation I/O failures are errors; everything about
    /// the child itself is reported through [`GateOutcome`].
    pub async fn offer(&self, analysis: &CommandAnalysis) -> Result<GateOutcome, ExecError> {
        let command = analysis.corrected_command.trim();
        let question = format!("Run `{}`?", command);

        if !self
            .confirm
            .confirm(&question)
            .await
            .map_err(ExecError::from_confirm)?
        {
            tracing::debug!(command, "suggestion declined");
            return Ok(GateOutcome::Declined);
        }

        let runner = Runner::new(self.confirm)
            .echo(self.echo)
            .watchdog(self.watchdog);

        match runner.run_argv(command).await {
            Ok(output) => Ok(GateOutcome::Executed(output)),
            Err(ExecError::Interrupted) => Err(ExecError::Interrupted),
            Err(e) => {
                tracing::debug!(error = %e, "suggestion could not run");
                Ok(GateOutcome::Failed(e.to_string()))
            }
        }
    }

    /// After a failed run, ask whether the new output should be analyzed.
    pub async fn offer_followup(&self, output: &CommandOutput) -> Result<bool, ExecError> {
        if output.success() || output.terminated {
            return Ok(false);
        }
        self.confirm
            .confirm("Analyze this output?")
            .await
            .map_err(ExecError::from_confirm)
    }
}
