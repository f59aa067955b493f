use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::future::Future;
use std::io;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use clai::cli::Cli;
use clai::config::{self, Config};
use clai::context::CommandContext;
use clai::executor::{CommandOutput, ExecError, Runner};
use clai::gate::{Confirm, ExecutionGate, GateOutcome, TerminalConfirm};
use clai::intent::IntentKind;
use clai::orchestrator::{Orchestrator, QueryError, QueryRequest};
use clai::output::{self, format_error};
use clai::progress::{Echo, TerminalProgress};
use clai::prompt;
use clai::providers::{self, create_provider, ProviderConfig, ProviderError, ProviderKind};
use clai::response::{ResponseEnvelope, ResponseKind};

/// Conventional exit status after SIGINT
const EXIT_INTERRUPTED: u8 = 130;

fn init_logging(verbose: bool) {
    let default = if verbose { "warn,clai=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("CLAI_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "clai", &mut io::stdout());
}

fn print_providers() {
    println!("{}", "Providers:".bold());
    for (kind, ready) in providers::list_providers() {
        let status = match (kind.api_key_env(), ready) {
            (None, _) => "no key needed".green(),
            (Some(_), true) => "key set".green(),
            (Some(var), false) => format!("set {var}").yellow(),
        };
        println!(
            "  {:<10} {:<26} {}",
            kind.to_string().bold(),
            kind.default_model().dimmed(),
            status
        );
    }
}

/// Layer the config file, environment, and flags into provider settings
fn resolve_provider(kind: Option<ProviderKind>, model: Option<&str>) -> Result<ProviderConfig> {
    let mut config = Config::load()?;
    config.apply_env_overrides();
    config.apply_overrides(kind.map(|k| k.to_string()), model.map(str::to_string));
    Ok(config.resolve()?)
}

/// Hint shown under the error line, when there is something useful to say
fn tip_for(err: &anyhow::Error) -> Option<String> {
    if let Some(query) = err.downcast_ref::<QueryError>() {
        return match query {
            QueryError::Unsafe(_) => {
                Some("The suggestion was rejected for safety. Nothing was run.".to_string())
            }
            QueryError::Exhausted { .. } => Some(
                "Try another model with --model, or run with --verbose to see the raw output."
                    .to_string(),
            ),
            QueryError::Transport { .. } => Some(
                "Check your network, or for Ollama make sure `ollama serve` is running."
                    .to_string(),
            ),
            QueryError::Provider(e) => provider_tip(e),
        };
    }
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ProviderError>())
        .and_then(provider_tip)
}

fn provider_tip(err: &ProviderError) -> Option<String> {
    match err {
        ProviderError::MissingApiKey { env_var, .. } => Some(format!(
            "export {env_var}=... or pick another provider with --provider"
        )),
        ProviderError::Network { .. } => {
            Some("For Ollama, make sure `ollama serve` is running.".to_string())
        }
        e if e.is_configuration() => Some(
            "Run `clai --check` to test the provider, or `clai --print-config` to see the supported settings."
                .to_string(),
        ),
        _ => None,
    }
}

fn is_interrupted(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<ExecError>(), Some(ExecError::Interrupted)))
}

/// One invocation's worth of settings shared by every analysis round
struct Session<'a> {
    orchestrator: Orchestrator<'a>,
    confirm: &'a dyn Confirm,
    json: bool,
    verbose: bool,
    user_prompt: Option<String>,
}

impl Session<'_> {
    async fn query(&self, prompt: String, kind: ResponseKind) -> Result<ResponseEnvelope> {
        if self.verbose {
            output::print_debug_section("Prompt", &prompt, Some(format!("({} chars)", prompt.len())));
        }

        let echo = match (kind, self.json, self.verbose) {
            (ResponseKind::Ask, false, _) => Echo::Answer,
            (_, _, true) => Echo::Diagnostic,
            _ => Echo::Quiet,
        };
        let mut progress = TerminalProgress::new(self.orchestrator.provider().model_name(), echo);
        let request = QueryRequest::new(prompt, kind);

        Ok(self.orchestrator.run(&request, &mut progress).await?)
    }

    /// Re-run the user's command, diagnose it, and offer the fix. Failed fixes
    /// can be fed into another round.
    async fn diagnose_command(&self, command: &str) -> Result<()> {
        if !self.json {
            output::print_run_header(command);
        }
        let runner = Runner::new(self.confirm).echo(!self.json);
        let first = match runner.run_shell(command).await {
            Ok(output) => output,
            Err(ExecError::Interrupted) => return Err(ExecError::Interrupted.into()),
            Err(e) => CommandOutput::not_started(command, e),
        };

        let mut context = CommandContext::from_output(&first);
        loop {
            let prompt = prompt::build_command_prompt(&context, self.user_prompt.as_deref());
            let envelope = self.query(prompt, ResponseKind::Command).await?;

            if self.json {
                output::print_json(&envelope)?;
                return Ok(());
            }
            output::print_envelope(&envelope, None);

            let Some(analysis) = envelope.as_command() else {
                return Ok(());
            };
            let gate = ExecutionGate::new(self.confirm);
            let outcome = gate.offer(analysis).await?;
            output::print_gate_outcome(&outcome);

            match outcome {
                GateOutcome::Executed(output) if gate.offer_followup(&output).await? => {
                    context = CommandContext::from_output(&output);
                }
                _ => return Ok(()),
            }
        }
    }

    async fn review_file(&self, path: &std::path::Path, content: &str) -> Result<()> {
        let prompt = prompt::build_file_prompt(content, path, self.user_prompt.as_deref());
        let envelope = self.query(prompt, ResponseKind::File).await?;
        if self.json {
            output::print_json(&envelope)?;
        } else {
            output::print_envelope(&envelope, Some(path));
        }
        Ok(())
    }

    async fn answer(&self, question: &str) -> Result<()> {
        let envelope = self
            .query(prompt::build_ask_prompt(question), ResponseKind::Ask)
            .await?;
        // Without --json the answer was already streamed to stdout
        if self.json {
            output::print_json(&envelope)?;
        }
        Ok(())
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if let Some(shell) = cli.completions {
        print_completions(shell);
        return Ok(ExitCode::SUCCESS);
    }

    if cli.print_config {
        config::print_default_config();
        return Ok(ExitCode::SUCCESS);
    }

    if cli.list_providers {
        print_providers();
        return Ok(ExitCode::SUCCESS);
    }

    if cli.check {
        let provider_config = resolve_provider(cli.provider, cli.model.as_deref())?;
        let provider = create_provider(&provider_config)?;
        provider
            .check()
            .await
            .with_context(|| format!("{} is not ready", provider.name()))?;
        println!(
            "{} {} is ready (model {})",
            "✓".green(),
            provider.name().bold(),
            provider.model_name()
        );
        return Ok(ExitCode::SUCCESS);
    }

    let Some(intent) = cli.to_intent()? else {
        eprintln!(
            "{}",
            format_error(
                "Nothing to analyze.",
                Some("Pass a command (`clai gti status`), or use --command, --file, or --ask.")
            )
        );
        return Ok(ExitCode::FAILURE);
    };

    let provider_config = resolve_provider(cli.provider, intent.model.as_deref())?;
    let provider = create_provider(&provider_config)?;
    tracing::debug!(provider = provider.name(), model = provider.model_name(), kind = %intent.response_kind(), "starting");

    let confirm = TerminalConfirm;
    let session = Session {
        orchestrator: Orchestrator::new(provider.as_ref()),
        confirm: &confirm,
        json: cli.json,
        verbose: intent.verbose,
        user_prompt: intent.user_prompt.clone(),
    };

    match &intent.kind {
        IntentKind::Command(command) => session.diagnose_command(command).await?,
        IntentKind::File { path, content } => session.review_file(path, content).await?,
        IntentKind::Ask(question) => session.answer(question).await?,
    }

    Ok(ExitCode::SUCCESS)
}

/// Drive `future` on a fresh runtime and shut it down without waiting for
/// blocking tasks. A confirmation prompt interrupted by Ctrl-C leaves its
/// stdin read behind, and that read must not keep the process alive.
fn block_on<F: Future>(future: F) -> io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

async fn run_until_interrupted(cli: Cli) -> Result<ExitCode> {
    // Dropping `run` on Ctrl-C kills any child process group and clears the spinner
    tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => Err(ExecError::Interrupted.into()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = block_on(run_until_interrupted(cli))
        .context("Failed to start the async runtime")
        .and_then(|result| result);

    match result {
        Ok(code) => code,
        Err(err) if is_interrupted(&err) => {
            eprintln!();
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(err) => {
            let tip = tip_for(&err);
            eprintln!("{}", format_error(&format!("{err:#}"), tip.as_deref()));
            ExitCode::FAILURE
        }
    }
}
