//! Anthropic Claude API provider.
//!
//! This provider uses the streaming Messages API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    send_checked, sse_text_stream, Provider, ProviderConfig, ProviderError, ProviderKind,
    TextStream,
};

/// Anthropic API endpoint
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version
const ANTHROPIC_VERSION: &str = "2023-06-01";

const PROVIDER_NAME: &str = "Anthropic Claude";

/// Anthropic provider
pub struct AnthropicProvider {
    /// HTTP client
    client: Client,
    /// API key
    api_key: String,
    /// Model to use
    model: String,
    /// Maximum tokens to generate
    max_tokens: u32,
    /// Messages endpoint
    endpoint: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            max_tokens,
            endpoint: ANTHROPIC_API_URL.to_string(),
        }
    }

    /// Create from resolved configuration
    pub fn from_config(config: &ProviderConfig, api_key: String) -> Self {
        let mut provider = Self::new(api_key, config.model.clone(), config.max_tokens);
        if let Some(ref base_url) = config.base_url {
            provider.endpoint = format!("{}/v1/messages", base_url.trim_end_matches('/'));
        }
        provider
    }

    /// Build the request body
    fn build_request(&self, content: &str) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: content.to_string(),
            }],
            stream: true,
        }
    }
}

/// Map one streamed event to a text fragment.
///
/// Only `content_block_delta` events of type `text_delta` carry text; an
/// `error` event aborts the stream.
fn extract_text(data: &str) -> Result<Option<String>, ProviderError> {
    let event: StreamEvent = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparseable Anthropic event");
            return Ok(None);
        }
    };

    match event.event_type.as_str() {
        "content_block_delta" => Ok(event
            .delta
            .filter(|delta| delta.delta_type == "text_delta")
            .and_then(|delta| delta.text)),
        "error" => Err(ProviderError::Stream {
            provider: PROVIDER_NAME.to_string(),
            message: event
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "unknown error".to_string()),
        }),
        _ => Ok(None),
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn open_stream(&self, prompt: &str) -> Result<TextStream, ProviderError> {
        let request = self.build_request(prompt);

        let response = send_checked(
            self.client
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&request),
            PROVIDER_NAME,
        )
        .await?;

        Ok(sse_text_stream(response.bytes_stream(), PROVIDER_NAME, extract_text))
    }
}

// API types

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    error: Option<EventError>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(rename = "type")]
    delta_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventError {
    message: String,
}
