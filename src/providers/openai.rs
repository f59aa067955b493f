//! OpenAI-compatible Chat Completions provider.
//!
//! Serves both OpenAI and DeepSeek, which expose the same streaming API under
//! different hosts.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    send_checked, sse_text_stream, Provider, ProviderConfig, ProviderError, ProviderKind,
    TextStream,
};

/// OpenAI API endpoint
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// DeepSeek API endpoint
const DEEPSEEK_API_URL: &str = "https://api.deepseek.com/chat/completions";

/// OpenAI-compatible provider
pub struct OpenAIProvider {
    /// HTTP client
    client: Client,
    /// Which vendor this instance talks to
    kind: ProviderKind,
    /// API key
    api_key: String,
    /// Model to use
    model: String,
    /// Maximum tokens to generate
    max_tokens: u32,
    /// Chat completions endpoint
    endpoint: String,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            kind: ProviderKind::OpenAI,
            api_key,
            model,
            max_tokens,
            endpoint: OPENAI_API_URL.to_string(),
        }
    }

    /// Create a DeepSeek provider
    pub fn deepseek(api_key: String, model: String, max_tokens: u32) -> Self {
        Self {
            kind: ProviderKind::DeepSeek,
            endpoint: DEEPSEEK_API_URL.to_string(),
            ..Self::new(api_key, model, max_tokens)
        }
    }

    /// Create from resolved configuration
    pub fn from_config(config: &ProviderConfig, api_key: String) -> Self {
        let mut provider = match config.kind {
            ProviderKind::DeepSeek => {
                Self::deepseek(api_key, config.model.clone(), config.max_tokens)
            }
            _ => Self::new(api_key, config.model.clone(), config.max_tokens),
        };
        if let Some(ref base_url) = config.base_url {
            provider.endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        }
        provider
    }

    /// Build the request body
    fn build_request(&self, content: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            max_tokens: Some(self.max_tokens),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: content.to_string(),
            }],
            stream: true,
        }
    }
}

/// Pull the text delta out of one streamed chunk
fn extract_delta(provider: &'static str, data: &str) -> Result<Option<String>, ProviderError> {
    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(provider, error = %e, "skipping unparseable chunk");
            return Ok(None);
        }
    };

    if let Some(error) = chunk.error {
        return Err(ProviderError::Stream {
            provider: provider.to_string(),
            message: error.message,
        });
    }

    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.and_then(|delta| delta.content))
        .collect();
    Ok(Some(text))
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn name(&self) -> &'static str {
        self.kind.display_name()
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn open_stream(&self, prompt: &str) -> Result<TextStream, ProviderError> {
        let request = self.build_request(prompt);
        let name = self.name();

        let response = send_checked(
            self.client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request),
            name,
        )
        .await?;

        Ok(sse_text_stream(response.bytes_stream(), name, move |data| {
            extract_delta(name, data)
        }))
    }
}

// API types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}
