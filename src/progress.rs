//! Terminal progress display for running queries.

use std::io::{self, Write};
use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::orchestrator::{QueryEvent, QueryObserver, RetryReason};

/// Where streamed fragments go, if anywhere
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    /// Keep fragments hidden behind the spinner
    Quiet,
    /// Show raw model output on stderr (verbose mode)
    Diagnostic,
    /// The fragments are the answer; write them to stdout
    Answer,
}

/// Spinner plus retry notices, driven by [`QueryEvent`]s.
///
/// The spinner is cleared when the query finishes and again on drop, so an
/// early return or Ctrl-C never leaves it ticking.
pub struct TerminalProgress {
    model: String,
    echo: Echo,
    spinner: Option<ProgressBar>,
    announced: u32,
    echoed: bool,
}

impl TerminalProgress {
    pub fn new(model: impl Into<String>, echo: Echo) -> Self {
        Self {
            model: model.into(),
            echo,
            spinner: None,
            announced: 1,
            echoed: false,
        }
    }

    fn spin(&mut self, message: String) {
        match &self.spinner {
            Some(spinner) => spinner.set_message(message),
            None => {
                let spinner = ProgressBar::new_spinner();
                if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
                    spinner.set_style(style);
                }
                spinner.set_message(message);
                spinner.enable_steady_tick(Duration::from_millis(80));
                self.spinner = Some(spinner);
            }
        }
    }

    fn clear(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    /// Print a line without tearing the spinner
    fn notice(&self, line: String) {
        match &self.spinner {
            Some(spinner) => spinner.suspend(|| eprintln!("{line}")),
            None => eprintln!("{line}"),
        }
    }

    fn write_fragment(&mut self, text: &str) {
        self.echoed = true;
        let result = match self.echo {
            Echo::Quiet => Ok(()),
            Echo::Diagnostic => {
                let mut err = io::stderr();
                write!(err, "{}", text.dimmed()).and_then(|_| err.flush())
            }
            Echo::Answer => {
                let mut out = io::stdout();
                write!(out, "{text}").and_then(|_| out.flush())
            }
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "could not echo fragment");
        }
    }

    fn finish(&mut self) {
        self.clear();
        if self.echoed && self.echo != Echo::Quiet {
            match self.echo {
                Echo::Answer => println!(),
                _ => eprintln!(),
            }
        }
        self.echoed = false;
    }
}

impl QueryObserver for TerminalProgress {
    fn on_event(&mut self, event: &QueryEvent) {
        match event {
            QueryEvent::Connecting { attempt, max } => {
                if *attempt > self.announced {
                    self.announced = *attempt;
                    self.notice(format!(
                        "{} Attempt {}/{} with {}",
                        "↻".yellow(),
                        attempt,
                        max,
                        self.model.bold()
                    ));
                }
                self.spin(format!("Connecting to {}...", self.model));
            }
            QueryEvent::Streaming => match self.echo {
                Echo::Quiet => self.spin("Thinking...".to_string()),
                _ => self.clear(),
            },
            QueryEvent::Fragment(text) => {
                if self.echo != Echo::Quiet {
                    self.write_fragment(text);
                }
            }
            QueryEvent::Validating => {
                if self.echoed && self.echo == Echo::Diagnostic {
                    eprintln!();
                    self.echoed = false;
                }
                if self.echo == Echo::Quiet {
                    self.spin("Checking response...".to_string());
                }
            }
            QueryEvent::Retrying {
                attempt,
                max,
                reason,
            } => {
                let line = match reason {
                    RetryReason::Format(msg) => format!(
                        "{} Response was malformed ({}), asking again",
                        "!".yellow(),
                        msg
                    ),
                    RetryReason::Transport(msg) => format!(
                        "{} Connection failed ({}), reconnecting {}/{}",
                        "!".yellow(),
                        msg,
                        attempt,
                        max
                    ),
                };
                self.notice(line);
            }
            QueryEvent::Done | QueryEvent::Failed => self.finish(),
        }
    }
}

impl Drop for TerminalProgress {
    fn drop(&mut self) {
        self.clear();
    }
}
