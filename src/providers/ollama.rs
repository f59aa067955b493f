//! Local Ollama daemon provider.
//!
//! Talks to `/api/generate`, which streams newline-delimited JSON objects.

use std::fmt;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{send_checked, Provider, ProviderConfig, ProviderError, ProviderKind, TextStream};

/// Default address of the Ollama daemon
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

const PROVIDER_NAME: &str = "Ollama";

/// Ollama provider for local models
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    /// Create from resolved configuration, falling back to `OLLAMA_HOST`
    pub fn from_config(config: &ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .or_else(|| std::env::var("OLLAMA_HOST").ok().filter(|h| !h.is_empty()))
            .map(|host| normalize_host(&host))
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Self::new(base_url, config.model.clone())
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    /// List models pulled into the daemon
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = send_checked(self.client.get(self.tags_url()), PROVIDER_NAME).await?;
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::network(PROVIDER_NAME, e))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

/// `OLLAMA_HOST` is often given without a scheme (`127.0.0.1:11434`)
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

/// Whether `installed` (as reported by `/api/tags`) provides `model`
fn model_matches(installed: &str, model: &str) -> bool {
    installed == model
        || (!model.contains(':') && installed.strip_suffix(":latest") == Some(model))
}

/// Parse one NDJSON line; blank or unparseable lines yield `None`.
fn parse_line(line: &str) -> Result<Option<GenerateChunk>, ProviderError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    match serde_json::from_str::<GenerateChunk>(line) {
        Ok(chunk) => match chunk.error {
            Some(message) => Err(ProviderError::Stream {
                provider: PROVIDER_NAME.to_string(),
                message,
            }),
            None => Ok(Some(chunk)),
        },
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparseable Ollama line");
            Ok(None)
        }
    }
}

/// Decode an `/api/generate` body into text fragments. Stops after the
/// `done` chunk and ends with an error on an `error` line.
fn ndjson_text_stream<S, B, E>(body: S) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();
        let mut eof = false;

        while !eof {
            match body.next().await {
                Some(Ok(chunk)) => buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    yield Err(ProviderError::network(PROVIDER_NAME, e));
                    return;
                }
                None => {
                    eof = true;
                    buffer.push(b'\n');
                }
            }

            // Only complete lines are decoded so multi-byte characters split
            // across network chunks survive.
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).into_owned();
                match parse_line(&line) {
                    Ok(Some(chunk)) => {
                        if !chunk.response.is_empty() {
                            yield Ok(chunk.response);
                        }
                        if chunk.done {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }
    })
}

#[async_trait]
impl Provider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn open_stream(&self, prompt: &str) -> Result<TextStream, ProviderError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
        };

        let response = send_checked(
            self.client
                .post(self.generate_url())
                .header("Content-Type", "application/json")
                .json(&request),
            PROVIDER_NAME,
        )
        .await?;

        Ok(ndjson_text_stream(response.bytes_stream()))
    }

    async fn check(&self) -> Result<(), ProviderError> {
        let models = self.list_models().await?;
        if models.iter().any(|m| model_matches(m, &self.model)) {
            Ok(())
        } else {
            Err(ProviderError::ModelNotFound(format!(
                "{} is not pulled into Ollama. Run: ollama pull {}",
                self.model, self.model
            )))
        }
    }
}

// API types

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}
