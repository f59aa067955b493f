//! End-to-end runs of the analysis pipeline against a scripted provider.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use clai::context::CommandContext;
use clai::gate::{Confirm, ExecutionGate, GateOutcome};
use clai::intent::{Intent, IntentError};
use clai::orchestrator::{NoopObserver, QueryEvent, QueryObserver, RetryReason};
use clai::prompt::{build_ask_prompt, build_command_prompt, build_file_prompt};
use clai::providers::TextStream;
use clai::validate::UnsafePattern;
use clai::{
    Orchestrator, Provider, ProviderError, ProviderKind, QueryError, QueryRequest,
    ResponseEnvelope, ResponseKind, ValidationError,
};

/// Provider that replays canned responses, one per call
struct Replay {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl Replay {
    fn new<I: IntoIterator<Item = S>, S: Into<String>>(responses: I) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for Replay {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn name(&self) -> &'static str {
        "Replay"
    }

    fn model_name(&self) -> &str {
        "replay"
    }

    async fn open_stream(&self, _prompt: &str) -> Result<TextStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();

        // Deliver in small pieces like a real stream
        let chars: Vec<char> = text.chars().collect();
        let pieces: Vec<Result<String, ProviderError>> = chars
            .chunks(7)
            .map(|chunk| Ok(chunk.iter().collect()))
            .collect();
        Ok(Box::pin(futures::stream::iter(pieces)))
    }
}

#[derive(Default)]
struct Events(Vec<QueryEvent>);

impl QueryObserver for Events {
    fn on_event(&mut self, event: &QueryEvent) {
        self.0.push(event.clone());
    }
}

struct Yes;

#[async_trait]
impl Confirm for Yes {
    async fn confirm(&self, _question: &str) -> io::Result<bool> {
        Ok(true)
    }
}

fn fenced(json: serde_json::Value) -> String {
    format!("Sure, here is the analysis.\n```json\n{json}\n```\n")
}

fn command_reply(corrected: &str) -> String {
    fenced(serde_json::json!({
        "description": "The command name gti is a typo of git.",
        "possible_fixes": ["Use git", "Add an alias gti=git", "Enable shell autocorrect"],
        "corrected_command": corrected,
        "explanation": "zsh could not find a program called gti on PATH."
    }))
}

fn gti_prompt() -> String {
    let ctx = CommandContext::new("gti status")
        .stderr("zsh: command not found: gti")
        .exit_code(127);
    build_command_prompt(&ctx, None)
}

#[tokio::test]
async fn test_typo_is_corrected_on_first_attempt() {
    let provider = Replay::new([command_reply("sudo  git   status")]);
    let request = QueryRequest::new(gti_prompt(), ResponseKind::Command);

    let envelope = Orchestrator::new(&provider)
        .run(&request, &mut NoopObserver)
        .await
        .unwrap();

    let analysis = envelope.as_command().unwrap();
    assert_eq!(analysis.corrected_command, "git status");
    assert_eq!(analysis.possible_fixes.len(), 3);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_unsafe_suggestion_is_rejected_without_retry() {
    let provider = Replay::new([
        command_reply("rm -rf / && echo done"),
        command_reply("git status"),
    ]);
    let request = QueryRequest::new(gti_prompt(), ResponseKind::Command);
    let mut events = Events::default();

    let err = Orchestrator::new(&provider)
        .run(&request, &mut events)
        .await
        .unwrap_err();

    match &err {
        QueryError::Unsafe(ValidationError::UnsafeCommand { patterns, .. }) => {
            assert!(patterns.contains(&UnsafePattern::RecursiveDelete));
            assert!(patterns.contains(&UnsafePattern::CompoundOperator));
        }
        other => panic!("expected a safety rejection, got {other:?}"),
    }
    assert!(err.to_string().contains("unsafe"));
    assert_eq!(provider.calls(), 1);
    assert!(!events
        .0
        .iter()
        .any(|e| matches!(e, QueryEvent::Retrying { .. })));
}

#[tokio::test]
async fn test_unterminated_block_is_retried_once() {
    let first = command_reply("git status").trim_end().trim_end_matches("```").to_string();
    let provider = Replay::new([first, command_reply("git status")]);
    let request = QueryRequest::new(gti_prompt(), ResponseKind::Command);
    let mut events = Events::default();

    let envelope = Orchestrator::new(&provider)
        .backoff(Duration::ZERO)
        .run(&request, &mut events)
        .await
        .unwrap();

    assert_eq!(envelope.as_command().unwrap().corrected_command, "git status");
    assert_eq!(provider.calls(), 2);
    assert!(events.0.iter().any(|e| matches!(
        e,
        QueryEvent::Retrying {
            attempt: 2,
            reason: RetryReason::Format(_),
            ..
        }
    )));
    assert!(events.0.contains(&QueryEvent::Connecting { attempt: 2, max: 3 }));
}

#[test]
fn test_empty_file_never_reaches_the_model() {
    let provider = Replay::new(Vec::<String>::new());
    let file = tempfile::NamedTempFile::new().unwrap();

    let err = Intent::from_file(file.path()).unwrap_err();

    assert!(matches!(err, IntentError::EmptyFile(_)));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_file_review_validates_file_schema() {
    let reply = fenced(serde_json::json!({
        "file_type": "Dockerfile",
        "summary": "Builds a Node service image.",
        "issues": ["Runs as root", "No pinned base tag", "No healthcheck"],
        "recommendations": ["Add USER node", "Pin node:20.11", "Add HEALTHCHECK"],
        "security_analysis": "Running as root widens the blast radius of a compromise."
    }));
    let provider = Replay::new([reply]);
    let prompt = build_file_prompt(
        "FROM node\nCOPY . .\n",
        std::path::Path::new("Dockerfile"),
        None,
    );

    let envelope = Orchestrator::new(&provider)
        .run(&QueryRequest::new(prompt, ResponseKind::File), &mut NoopObserver)
        .await
        .unwrap();

    let analysis = envelope.as_file().unwrap();
    assert_eq!(analysis.file_type, "Dockerfile");
    assert_eq!(analysis.issues.len(), 3);
}

#[tokio::test]
async fn test_ask_returns_text_untouched() {
    let raw = "Try this:\n```json\n{\"broken\": \n```\nand `ss -tlnp` too.";
    let provider = Replay::new([raw]);
    let request = QueryRequest::new(
        build_ask_prompt("how do I see listening ports?"),
        ResponseKind::Ask,
    );

    let envelope = Orchestrator::new(&provider)
        .run(&request, &mut NoopObserver)
        .await
        .unwrap();

    assert_eq!(envelope, ResponseEnvelope::Text(raw.to_string()));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_confirmed_suggestion_runs_at_the_gate() {
    let provider = Replay::new([command_reply("echo fixed")]);
    let request = QueryRequest::new(gti_prompt(), ResponseKind::Command);
    let envelope = Orchestrator::new(&provider)
        .run(&request, &mut NoopObserver)
        .await
        .unwrap();

    let gate = ExecutionGate::new(&Yes).echo(false);
    let outcome = gate.offer(envelope.as_command().unwrap()).await.unwrap();

    let GateOutcome::Executed(output) = outcome else {
        panic!("expected the command to run, got {outcome:?}");
    };
    assert_eq!(output.stdout, "fixed\n");
    assert!(output.success());
}
