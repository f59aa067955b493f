//! LLM provider abstraction.
//!
//! Every backend, whether the local Ollama daemon or a hosted API, is exposed
//! through the same contract: [`Provider::open_stream`] sends one prompt and
//! returns a finite stream of text fragments. A stream is never restarted;
//! retrying means calling `open_stream` again. Providers do not retry on their
//! own.

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use clap::ValueEnum;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;

/// Ordered text fragments produced by one provider call
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Available LLM backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local Ollama daemon
    #[default]
    Ollama,
    /// Google Gemini API
    Google,
    /// OpenAI API
    #[value(name = "openai")]
    OpenAI,
    /// Anthropic Claude API
    Anthropic,
    /// DeepSeek API
    #[value(name = "deepseek")]
    DeepSeek,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Ollama,
        ProviderKind::Google,
        ProviderKind::OpenAI,
        ProviderKind::Anthropic,
        ProviderKind::DeepSeek,
    ];

    /// Default environment variable holding the API key
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            ProviderKind::Ollama => None,
            ProviderKind::Google => Some("GOOGLE_API_KEY"),
            ProviderKind::OpenAI => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::DeepSeek => Some("DEEPSEEK_API_KEY"),
        }
    }

    /// Model used when the configuration does not name one
    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Ollama => "llama3.2",
            ProviderKind::Google => "gemini-2.0-flash",
            ProviderKind::OpenAI => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-3-5-haiku-latest",
            ProviderKind::DeepSeek => "deepseek-chat",
        }
    }

    /// Name for display
    pub fn display_name(self) -> &'static str {
        match self {
            ProviderKind::Ollama => "Ollama",
            ProviderKind::Google => "Google Gemini",
            ProviderKind::OpenAI => "OpenAI",
            ProviderKind::Anthropic => "Anthropic Claude",
            ProviderKind::DeepSeek => "DeepSeek",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Ollama => write!(f, "ollama"),
            ProviderKind::Google => write!(f, "google"),
            ProviderKind::OpenAI => write!(f, "openai"),
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::DeepSeek => write!(f, "deepseek"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" | "local" => Ok(ProviderKind::Ollama),
            "google" | "gemini" => Ok(ProviderKind::Google),
            "openai" => Ok(ProviderKind::OpenAI),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "deepseek" => Ok(ProviderKind::DeepSeek),
            _ => Err(ProviderError::Unsupported(s.to_string())),
        }
    }
}

/// Resolved provider settings, read-only for the rest of the crate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Which backend to talk to
    pub kind: ProviderKind,
    /// Model identifier, passed through opaquely
    pub model: String,
    /// Environment variable holding the API key (overrides the default)
    pub api_key_env: Option<String>,
    /// Base URL override (for custom endpoints or a remote Ollama)
    pub base_url: Option<String>,
    /// Maximum tokens to generate
    pub max_tokens: u32,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
            api_key_env: None,
            base_url: None,
            max_tokens: 1024,
        }
    }

    /// The environment variable consulted for the credential, if any
    pub fn credential_var(&self) -> Option<&str> {
        if self.kind.api_key_env().is_none() {
            return None;
        }
        self.api_key_env.as_deref().or(self.kind.api_key_env())
    }

    /// Read the API key from the environment.
    ///
    /// Returns `Ok(None)` for providers that need no credential.
    pub fn resolve_api_key(&self) -> Result<Option<String>, ProviderError> {
        let Some(env_var) = self.credential_var() else {
            return Ok(None);
        };

        std::env::var(env_var)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(Some)
            .ok_or_else(|| ProviderError::MissingApiKey {
                provider: self.kind.display_name().to_string(),
                env_var: env_var.to_string(),
            })
    }

    fn require_api_key(&self) -> Result<String, ProviderError> {
        self.resolve_api_key()?
            .ok_or_else(|| ProviderError::MissingApiKey {
                provider: self.kind.display_name().to_string(),
                env_var: self.credential_var().unwrap_or_default().to_string(),
            })
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        let kind = ProviderKind::default();
        Self::new(kind, kind.default_model())
    }
}

/// Error types for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Unsupported provider: {0}. Valid options: ollama, google, openai, anthropic, deepseek")]
    Unsupported(String),

    #[error("API key not configured for {provider}. Set the {env_var} environment variable.")]
    MissingApiKey { provider: String, env_var: String },

    #[error("Could not reach {provider}: {message}")]
    Network { provider: String, message: String },

    #[error("Rate limited by {provider}. Please wait and try again.")]
    RateLimited { provider: String },

    #[error("API error from {provider} (HTTP {status}): {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider} aborted the response: {message}")]
    Stream { provider: String, message: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),
}

impl ProviderError {
    /// Failures worth another attempt: connectivity, throttling, server-side errors
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Network { .. }
            | ProviderError::RateLimited { .. }
            | ProviderError::Stream { .. } => true,
            ProviderError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Configuration problems the user has to fix before anything can work
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProviderError::Unsupported(_)
                | ProviderError::MissingApiKey { .. }
                | ProviderError::ModelNotFound(_)
        )
    }

    pub(crate) fn network(provider: &str, err: impl fmt::Display) -> Self {
        ProviderError::Network {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }
}

/// Provider trait for streaming LLM completions
#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the provider kind
    fn kind(&self) -> ProviderKind;

    /// Get the provider name for display
    fn name(&self) -> &'static str;

    /// Get the current model name/identifier
    fn model_name(&self) -> &str;

    /// Send `prompt` and return the response as a stream of text fragments.
    ///
    /// Connection and HTTP status failures are returned here; failures while
    /// reading the body arrive as `Err` items on the stream.
    async fn open_stream(&self, prompt: &str) -> Result<TextStream, ProviderError>;

    /// Verify the backend is usable (reachable, model present)
    async fn check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Build the provider selected by `config`.
///
/// Hosted providers fail here with [`ProviderError::MissingApiKey`] when the
/// credential variable is unset or empty.
pub fn create_provider(config: &ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
    let provider: Box<dyn Provider> = match config.kind {
        ProviderKind::Ollama => Box::new(OllamaProvider::from_config(config)),
        ProviderKind::Google => Box::new(GeminiProvider::from_config(
            config,
            config.require_api_key()?,
        )),
        ProviderKind::OpenAI | ProviderKind::DeepSeek => Box::new(OpenAIProvider::from_config(
            config,
            config.require_api_key()?,
        )),
        ProviderKind::Anthropic => Box::new(AnthropicProvider::from_config(
            config,
            config.require_api_key()?,
        )),
    };
    tracing::debug!(provider = %config.kind, model = %config.model, "provider ready");
    Ok(provider)
}

/// List all providers and whether their credential is present
pub fn list_providers() -> Vec<(ProviderKind, bool)> {
    ProviderKind::ALL
        .into_iter()
        .map(|kind| {
            let config = ProviderConfig::new(kind, kind.default_model());
            (kind, config.resolve_api_key().is_ok())
        })
        .collect()
}

/// Send a request and map connection failures and non-2xx statuses.
pub(crate) async fn send_checked(
    request: RequestBuilder,
    provider: &str,
) -> Result<Response, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::network(provider, e))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status.as_u16() == 429 {
        return Err(ProviderError::RateLimited {
            provider: provider.to_string(),
        });
    }
    Err(ProviderError::Api {
        provider: provider.to_string(),
        status: status.as_u16(),
        message: body.trim().to_string(),
    })
}

/// Turn a server-sent-events body into a [`TextStream`].
///
/// `extract` maps each event's `data` payload to an optional text fragment.
/// A `[DONE]` payload ends the stream.
pub(crate) fn sse_text_stream<S, B, E, F>(
    body: S,
    provider: &'static str,
    mut extract: F,
) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
    F: FnMut(&str) -> Result<Option<String>, ProviderError> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut events = Box::pin(body.eventsource());

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    yield Err(ProviderError::network(provider, e));
                    return;
                }
            };

            if event.data == "[DONE]" {
                break;
            }

            match extract(&event.data) {
                Ok(Some(text)) if !text.is_empty() => yield Ok(text),
                Ok(_) => {}
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_display() {
        assert_eq!(format!("{}", ProviderKind::Ollama), "ollama");
        assert_eq!(format!("{}", ProviderKind::Google), "google");
        assert_eq!(format!("{}", ProviderKind::OpenAI), "openai");
        assert_eq!(format!("{}", ProviderKind::Anthropic), "anthropic");
        assert_eq!(format!("{}", ProviderKind::DeepSeek), "deepseek");
    }

    #[test]
    fn test_provider_kind_from_str() {
        assert_eq!(
            "ollama".parse::<ProviderKind>().unwrap(),
            ProviderKind::Ollama
        );
        assert_eq!(
            "Gemini".parse::<ProviderKind>().unwrap(),
            ProviderKind::Google
        );
        assert_eq!(
            "OPENAI".parse::<ProviderKind>().unwrap(),
            ProviderKind::OpenAI
        );
        assert_eq!(
            "deepseek".parse::<ProviderKind>().unwrap(),
            ProviderKind::DeepSeek
        );
        assert!(matches!(
            "mistral".parse::<ProviderKind>(),
            Err(ProviderError::Unsupported(_))
        ));
    }

    #[test]
    fn test_provider_kind_default() {
        assert_eq!(ProviderKind::default(), ProviderKind::Ollama);
    }

    #[test]
    fn test_api_key_env() {
        assert_eq!(ProviderKind::Ollama.api_key_env(), None);
        assert_eq!(ProviderKind::Google.api_key_env(), Some("GOOGLE_API_KEY"));
        assert_eq!(ProviderKind::OpenAI.api_key_env(), Some("OPENAI_API_KEY"));
        assert_eq!(
            ProviderKind::Anthropic.api_key_env(),
            Some("ANTHROPIC_API_KEY")
        );
        assert_eq!(
            ProviderKind::DeepSeek.api_key_env(),
            Some("DEEPSEEK_API_KEY")
        );
    }

    #[test]
    fn test_credential_var_override() {
        let mut config = ProviderConfig::new(ProviderKind::OpenAI, "gpt-4o-mini");
        assert_eq!(config.credential_var(), Some("OPENAI_API_KEY"));
        config.api_key_env = Some("WORK_OPENAI_KEY".to_string());
        assert_eq!(config.credential_var(), Some("WORK_OPENAI_KEY"));

        let mut local = ProviderConfig::new(ProviderKind::Ollama, "llama3.2");
        local.api_key_env = Some("IGNORED".to_string());
        assert_eq!(local.credential_var(), None);
    }

    #[test]
    fn test_local_provider_needs_no_key() {
        let config = ProviderConfig::new(ProviderKind::Ollama, "llama3.2");
        assert_eq!(config.resolve_api_key().unwrap(), None);
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.kind(), ProviderKind::Ollama);
        assert_eq!(provider.model_name(), "llama3.2");
    }

    #[test]
    fn test_missing_api_key() {
        let mut config = ProviderConfig::new(ProviderKind::Anthropic, "claude");
        config.api_key_env = Some("CLAI_TEST_UNSET_KEY_7F3A".to_string());
        let err = create_provider(&config).err().unwrap();
        assert!(matches!(err, ProviderError::MissingApiKey { .. }));
        assert!(err.is_configuration());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("CLAI_TEST_UNSET_KEY_7F3A"));
    }

    type Chunk = Result<&'static [u8], std::io::Error>;

    fn body(chunks: Vec<Chunk>) -> impl Stream<Item = Chunk> + Send + 'static {
        futures::stream::iter(chunks)
    }

    fn field_t(data: &str) -> Result<Option<String>, ProviderError> {
        let value: serde_json::Value =
            serde_json::from_str(data).map_err(|e| ProviderError::Stream {
                provider: "Test".to_string(),
                message: e.to_string(),
            })?;
        Ok(value["t"].as_str().map(str::to_string))
    }

    #[tokio::test]
    async fn test_sse_stream_reassembles_events_and_stops_at_done() {
        let stream = sse_text_stream(
            body(vec![
                Ok(b"data: {\"t\":\"git\"}\n\ndata: {\"t\":\" st".as_slice()),
                Ok(b"atus\"}\n\n: keep-alive\n\ndata: {\"other\":1}\n\n".as_slice()),
                Ok(b"data: [DONE]\n\ndata: {\"t\":\"ignored\"}\n\n".as_slice()),
            ]),
            "Test",
            field_t,
        );
        let fragments: Vec<String> = stream.map(|item| item.unwrap()).collect().await;
        assert_eq!(fragments, vec!["git", " status"]);
    }

    #[tokio::test]
    async fn test_sse_stream_stops_at_extract_error() {
        let stream = sse_text_stream(
            body(vec![Ok(
                b"data: {\"t\":\"a\"}\n\ndata: not json\n\ndata: {\"t\":\"b\"}\n\n".as_slice(),
            )]),
            "Test",
            field_t,
        );
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "a");
        assert!(matches!(items[1], Err(ProviderError::Stream { .. })));
    }

    #[tokio::test]
    async fn test_sse_stream_body_error_is_transient() {
        let stream = sse_text_stream(
            body(vec![
                Ok(b"data: {\"t\":\"a\"}\n\n".as_slice()),
                Err(std::io::Error::other("connection reset")),
                Ok(b"data: {\"t\":\"b\"}\n\n".as_slice()),
            ]),
            "Test",
            field_t,
        );
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "a");
        let err = items[1].as_ref().unwrap_err();
        assert!(matches!(err, ProviderError::Network { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_error_classification() {
        let network = ProviderError::network("OpenAI", "connection refused");
        assert!(network.is_transient());
        assert!(!network.is_configuration());

        let server = ProviderError::Api {
            provider: "OpenAI".to_string(),
            status: 503,
            message: String::new(),
        };
        assert!(server.is_transient());

        let auth = ProviderError::Api {
            provider: "OpenAI".to_string(),
            status: 401,
            message: String::new(),
        };
        assert!(!auth.is_transient());
    }
}
