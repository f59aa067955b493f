//! Query orchestration.
//!
//! Drives one analysis request: open a stream, accumulate it, validate it,
//! and re-prompt with the schema when the answer is malformed. Progress is
//! reported through [`QueryObserver`] so presentation stays out of the loop.
//!
//! Two independent budgets apply. Format failures (no fence, bad JSON,
//! schema mismatch) get [`MAX_RETRIES`] attempts in total, each after the
//! first carrying a correction block. Transient transport failures get
//! [`MAX_TRANSPORT_ATTEMPTS`] reconnects and never consume a format attempt.
//! A safety rejection ends the request immediately.

use std::fmt;
use std::time::Duration;

use futures::StreamExt;

use crate::prompt::correction_prompt;
use crate::providers::{Provider, ProviderError};
use crate::response::{ResponseEnvelope, ResponseKind};
use crate::validate::{validate_for, ValidationError};

/// Total attempts for a well-formed answer (one initial try plus two corrections)
pub const MAX_RETRIES: u32 = 3;

/// Total connection attempts per format attempt
pub const MAX_TRANSPORT_ATTEMPTS: u32 = 3;

const TRANSPORT_BACKOFF: Duration = Duration::from_millis(750);

/// One analysis request
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub prompt: String,
    pub kind: ResponseKind,
}

impl QueryRequest {
    pub fn new(prompt: impl Into<String>, kind: ResponseKind) -> Self {
        Self {
            prompt: prompt.into(),
            kind,
        }
    }
}

/// Why another attempt is being made
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    /// The model answered but the answer did not validate
    Format(String),
    /// The connection or stream failed
    Transport(String),
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::Format(msg) => write!(f, "malformed response: {msg}"),
            RetryReason::Transport(msg) => write!(f, "connection failed: {msg}"),
        }
    }
}

/// State changes of a running query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEvent {
    Connecting { attempt: u32, max: u32 },
    /// The first fragment arrived
    Streaming,
    Fragment(String),
    Validating,
    Retrying {
        attempt: u32,
        max: u32,
        reason: RetryReason,
    },
    Done,
    Failed,
}

/// Receives [`QueryEvent`]s as they happen
pub trait QueryObserver: Send {
    fn on_event(&mut self, event: &QueryEvent);
}

/// Observer that ignores everything
#[derive(Debug, Default)]
pub struct NoopObserver;

impl QueryObserver for NoopObserver {
    fn on_event(&mut self, _event: &QueryEvent) {}
}

/// Terminal failures of a query
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("{0}")]
    Unsafe(ValidationError),

    #[error("The model did not return a valid response after {attempts} attempts ({last})")]
    Exhausted {
        attempts: u32,
        last: ValidationError,
    },

    #[error("Connection failed after {attempts} attempts: {last}")]
    Transport { attempts: u32, last: ProviderError },

    #[error(transparent)]
    Provider(ProviderError),
}

/// Runs queries against one provider
pub struct Orchestrator<'a> {
    provider: &'a dyn Provider,
    max_attempts: u32,
    max_transport_attempts: u32,
    backoff: Duration,
}

impl<'a> Orchestrator<'a> {
    pub fn new(provider: &'a dyn Provider) -> Self {
        Self {
            provider,
            max_attempts: MAX_RETRIES,
            max_transport_attempts: MAX_TRANSPORT_ATTEMPTS,
            backoff: TRANSPORT_BACKOFF,
        }
    }

    /// Builder: delay between reconnects (multiplied by the failure count)
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider
    }

    /// Run `request` to completion.
    ///
    /// Ask requests return the accumulated text untouched. Everything else
    /// is validated against the schema for `request.kind`.
    pub async fn run(
        &self,
        request: &QueryRequest,
        observer: &mut dyn QueryObserver,
    ) -> Result<ResponseEnvelope, QueryError> {
        let result = self.attempts(request, observer).await;
        observer.on_event(match result {
            Ok(_) => &QueryEvent::Done,
            Err(_) => &QueryEvent::Failed,
        });
        result
    }

    async fn attempts(
        &self,
        request: &QueryRequest,
        observer: &mut dyn QueryObserver,
    ) -> Result<ResponseEnvelope, QueryError> {
        let mut prompt = request.prompt.clone();
        let mut attempt = 1;

        loop {
            tracing::debug!(attempt, max = self.max_attempts, kind = %request.kind, "querying model");
            let text = self.fetch(&prompt, attempt, observer).await?;

            if !request.kind.is_structured() {
                return Ok(ResponseEnvelope::Text(text));
            }

            observer.on_event(&QueryEvent::Validating);
            match validate_for(&text, request.kind) {
                Ok(envelope) => return Ok(envelope),
                Err(e) if !e.is_retryable() => {
                    tracing::warn!(error = %e, "safety rejection");
                    return Err(QueryError::Unsafe(e));
                }
                Err(e) if attempt >= self.max_attempts => {
                    tracing::debug!(raw = %text, "last response");
                    return Err(QueryError::Exhausted { attempts: attempt, last: e });
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "invalid response, retrying with correction");
                    tracing::debug!(raw = %text, "rejected response");
                    attempt += 1;
                    prompt = correction_prompt(&request.prompt, request.kind);
                    observer.on_event(&QueryEvent::Retrying {
                        attempt,
                        max: self.max_attempts,
                        reason: RetryReason::Format(e.to_string()),
                    });
                }
            }
        }
    }

    /// Stream one complete answer, reconnecting on transient failures.
    async fn fetch(
        &self,
        prompt: &str,
        attempt: u32,
        observer: &mut dyn QueryObserver,
    ) -> Result<String, QueryError> {
        let mut failures = 0;

        loop {
            observer.on_event(&QueryEvent::Connecting {
                attempt,
                max: self.max_attempts,
            });

            match self.stream_once(prompt, observer).await {
                Ok(text) => return Ok(text),
                Err(e) if !e.is_transient() => return Err(QueryError::Provider(e)),
                Err(e) => {
                    failures += 1;
                    if failures >= self.max_transport_attempts {
                        return Err(QueryError::Transport {
                            attempts: failures,
                            last: e,
                        });
                    }
                    tracing::warn!(failures, error = %e, "transport failure, reconnecting");
                    observer.on_event(&QueryEvent::Retrying {
                        attempt: failures + 1,
                        max: self.max_transport_attempts,
                        reason: RetryReason::Transport(e.to_string()),
                    });
                    tokio::time::sleep(self.backoff * failures).await;
                }
            }
        }
    }

    async fn stream_once(
        &self,
        prompt: &str,
        observer: &mut dyn QueryObserver,
    ) -> Result<String, ProviderError> {
        let mut stream = self.provider.open_stream(prompt).await?;
        let mut buffer = String::new();
        let mut started = false;

        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            if !started {
                started = true;
                observer.on_event(&QueryEvent::Streaming);
            }
            buffer.push_str(&fragment);
            observer.on_event(&QueryEvent::Fragment(fragment));
        }

        tracing::debug!(bytes = buffer.len(), "stream finished");
        Ok(buffer)
    }
}
