//! Configuration for `clai`.
//!
//! Values are layered: built-in defaults, then `~/.config/clai/config.toml`,
//! then `CLAI_PROVIDER` / `CLAI_MODEL`, then command line flags. The result is
//! a [`ProviderConfig`] handed to the rest of the program by value.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::providers::{ProviderConfig, ProviderError, ProviderKind};

/// Default `max_tokens` for hosted providers
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// `[provider]` table
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderSection {
    /// Backend name (`ollama`, `google`, `openai`, `anthropic`, `deepseek`)
    pub kind: String,
    /// Model identifier; the backend's default when unset
    pub model: Option<String>,
    /// Custom endpoint (remote Ollama, proxy, compatible server)
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    pub max_tokens: u32,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default().to_string(),
            model: None,
            base_url: None,
            api_key_env: None,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderSection,
}

impl Config {
    /// Load the user's config file; a missing file yields the defaults
    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::config_path().as_deref())
    }

    /// Load config from a specific path
    pub fn load_from_path(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Get the config file path (~/.config/clai/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("clai").join("config.toml"))
    }

    /// Apply `CLAI_PROVIDER` and `CLAI_MODEL`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            env::var("CLAI_PROVIDER").ok(),
            env::var("CLAI_MODEL").ok(),
        );
    }

    /// Override provider and model. Switching provider drops the configured
    /// model, endpoint, and key variable, which all belonged to the old
    /// provider; a credential must never be sent to another backend's host.
    pub fn apply_overrides(&mut self, kind: Option<String>, model: Option<String>) {
        if let Some(kind) = kind.filter(|k| !k.trim().is_empty()) {
            if !kind.trim().eq_ignore_ascii_case(self.provider.kind.trim()) {
                self.provider.model = None;
                self.provider.base_url = None;
                self.provider.api_key_env = None;
            }
            self.provider.kind = kind;
        }
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            self.provider.model = Some(model);
        }
    }

    /// Produce the settings the providers consume
    pub fn resolve(&self) -> Result<ProviderConfig, ProviderError> {
        let kind: ProviderKind = self.provider.kind.parse()?;
        let model = self
            .provider
            .model
            .clone()
            .unwrap_or_else(|| kind.default_model().to_string());

        Ok(ProviderConfig {
            kind,
            model,
            api_key_env: self.provider.api_key_env.clone(),
            base_url: self.provider.base_url.clone(),
            max_tokens: self.provider.max_tokens,
        })
    }
}

/// Generate default config as TOML string
pub fn generate_default_config() -> String {
    r#"# clai configuration
# Place this file at ~/.config/clai/config.toml

[provider]
# One of: ollama, google, openai, anthropic, deepseek
kind = "ollama"

# Model name passed to the provider. Defaults per provider:
#   ollama    llama3.2
#   google    gemini-2.0-flash
#   openai    gpt-4o-mini
#   anthropic claude-3-5-haiku-latest
#   deepseek  deepseek-chat
model = "llama3.2"

# Custom endpoint, e.g. a remote Ollama (also read from OLLAMA_HOST)
# base_url = "http://localhost:11434"

# Environment variable holding the API key for hosted providers.
# Defaults: GOOGLE_API_KEY, OPENAI_API_KEY, ANTHROPIC_API_KEY, DEEPSEEK_API_KEY
# api_key_env = "OPENAI_API_KEY"

# Maximum tokens to generate
max_tokens = 1024

# Environment variable overrides:
# CLAI_PROVIDER=openai  - Use another provider for this run
# CLAI_MODEL=gpt-4o     - Use another model for this run
# CLAI_LOG=debug        - Log filter (tracing EnvFilter syntax)
"#
    .to_string()
}

/// Print the default config to stdout
pub fn print_default_config() {
    print!("{}", generate_default_config());
}
