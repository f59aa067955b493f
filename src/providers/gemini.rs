//! Google Gemini API provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    send_checked, sse_text_stream, Provider, ProviderConfig, ProviderError, ProviderKind,
    TextStream,
};

/// Gemini API base URL
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const PROVIDER_NAME: &str = "Google Gemini";

/// Gemini provider
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            max_tokens,
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    /// Create from resolved configuration
    pub fn from_config(config: &ProviderConfig, api_key: String) -> Self {
        let mut provider = Self::new(api_key, config.model.clone(), config.max_tokens);
        if let Some(ref base_url) = config.base_url {
            provider.base_url = base_url.trim_end_matches('/').to_string();
        }
        provider
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }

    fn build_request(&self, prompt: &str) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.max_tokens,
            },
        }
    }
}

fn extract_text(data: &str) -> Result<Option<String>, ProviderError> {
    let chunk: GenerateResponse = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparseable Gemini chunk");
            return Ok(None);
        }
    };

    if let Some(error) = chunk.error {
        return Err(ProviderError::Stream {
            provider: PROVIDER_NAME.to_string(),
            message: error.message,
        });
    }

    let text: String = chunk
        .candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
        .map(|part| part.text)
        .collect();
    Ok(Some(text))
}

#[async_trait]
impl Provider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn open_stream(&self, prompt: &str) -> Result<TextStream, ProviderError> {
        let response = send_checked(
            self.client
                .post(self.stream_url())
                .header("x-goog-api-key", &self.api_key)
                .header("Content-Type", "application/json")
                .json(&self.build_request(prompt)),
            PROVIDER_NAME,
        )
        .await?;

        Ok(sse_text_stream(response.bytes_stream(), PROVIDER_NAME, extract_text))
    }
}

// API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}
