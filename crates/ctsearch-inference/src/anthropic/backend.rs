//! Anthropic Messages API backend implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use ctsearch_core::defaults;
use ctsearch_core::{Error, GenerationBackend, Result};

use super::error::{to_ctsearch_error, AnthropicErrorCode};
use super::types::*;

/// Configuration for the Anthropic backend.
#[derive(Clone)]
pub struct AnthropicConfig {
    /// Base URL for the API endpoint.
    pub base_url: String,
    /// API key sent as `x-api-key`.
    pub api_key: String,
    /// Model to use for generation.
    pub model: String,
    /// Output token ceiling per request.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::ANTHROPIC_URL.to_string(),
            api_key: String::new(),
            model: defaults::GEN_MODEL.to_string(),
            max_tokens: defaults::GEN_MAX_TOKENS,
            temperature: defaults::GEN_TEMPERATURE,
            timeout_seconds: defaults::GEN_TIMEOUT_SECS,
        }
    }
}

// The key stays out of logs and panics
impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl AnthropicConfig {
    /// Create a configuration with defaults and the given key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Create from environment variables.
    ///
    /// `ANTHROPIC_API_KEY` is required; `ANTHROPIC_BASE_URL`,
    /// `ANTHROPIC_MODEL`, `ANTHROPIC_MAX_TOKENS` and `ANTHROPIC_TIMEOUT`
    /// override the defaults.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| Error::Config("ANTHROPIC_API_KEY is not set".to_string()))?;

        Ok(Self {
            base_url: std::env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| defaults::ANTHROPIC_URL.to_string()),
            api_key,
            model: std::env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| defaults::GEN_MODEL.to_string()),
            max_tokens: std::env::var("ANTHROPIC_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::GEN_MAX_TOKENS),
            temperature: defaults::GEN_TEMPERATURE,
            timeout_seconds: std::env::var("ANTHROPIC_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::GEN_TIMEOUT_SECS),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Anthropic Messages API backend.
pub struct AnthropicBackend {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicBackend {
    /// Create a new Anthropic backend with the given configuration.
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::Config("Anthropic API key is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "anthropic",
            op = "init",
            model = %config.model,
            base_url = %config.base_url,
            max_tokens = config.max_tokens,
            "Initializing Anthropic backend"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(AnthropicConfig::from_env()?)
    }

    /// Get the current configuration.
    pub fn config(&self) -> &AnthropicConfig {
        &self.config
    }

    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        self.client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", defaults::ANTHROPIC_VERSION)
            .header("content-type", "application/json")
    }
}

#[async_trait]
impl GenerationBackend for AnthropicBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let start = Instant::now();
        debug!(
            subsystem = "inference",
            component = "anthropic",
            op = "generate",
            model = %self.config.model,
            prompt_len = prompt.len(),
            "Sending messages request"
        );

        let request = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: vec![Message::user(prompt)],
        };

        let response = self
            .build_request("/v1/messages")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Request(format!("Anthropic request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body: ApiErrorResponse = response.json().await.unwrap_or(ApiErrorResponse {
                error: ApiError {
                    error_type: "unknown".to_string(),
                    message: "Unknown error".to_string(),
                },
            });
            let code = AnthropicErrorCode::from_response(status.as_u16(), &body.error.error_type);
            return Err(to_ctsearch_error(
                code,
                &format!("Anthropic returned {}: {}", status, body.error.message),
            ));
        }

        let result: MessagesResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))?;

        let content = result.text();

        debug!(
            subsystem = "inference",
            component = "anthropic",
            op = "generate",
            response_len = content.len(),
            stop_reason = result.stop_reason.as_deref().unwrap_or(""),
            duration_ms = start.elapsed().as_millis() as u64,
            "Generation complete"
        );
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AnthropicConfig::default();
        assert_eq!(config.base_url, defaults::ANTHROPIC_URL);
        assert_eq!(config.model, defaults::GEN_MODEL);
        assert_eq!(config.max_tokens, 4000);
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.timeout_seconds, defaults::GEN_TIMEOUT_SECS);
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn test_config_builders() {
        let config = AnthropicConfig::new("sk-test")
            .with_base_url("http://localhost:9999")
            .with_model("claude-test")
            .with_max_tokens(512);

        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.base_url, "http://localhost:9999");
        assert_eq!(config.model, "claude-test");
        assert_eq!(config.max_tokens, 512);
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", AnthropicConfig::new("sk-secret"));
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_backend_requires_key() {
        let result = AnthropicBackend::new(AnthropicConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_model_name_accessor() {
        let backend =
            AnthropicBackend::new(AnthropicConfig::new("sk-test").with_model("claude-x")).unwrap();
        assert_eq!(backend.model_name(), "claude-x");
        assert_eq!(backend.config().api_key, "sk-test");
    }
}
