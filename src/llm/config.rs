//! Model client configuration.

#![allow(clippy::missing_const_for_fn)]

use crate::config::Config;

/// Default base URL for the API.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Default timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
/// Default maximum retries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default retry delay in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
/// Default chat model.
pub const DEFAULT_MODEL: &str = "gpt-4";
/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default nucleus sampling mass.
pub const DEFAULT_TOP_P: f32 = 0.95;
/// Default completion length.
pub const DEFAULT_MAX_TOKENS: u32 = 800;

/// Client configuration for the chat-completion and embedding API.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL for the API.
    pub base_url: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of retries.
    pub max_retries: u32,
    /// Initial retry delay in milliseconds.
    pub retry_delay_ms: u64,
    /// Chat model used when a request names none.
    pub model: String,
    /// Embedding model.
    pub embedding_model: String,
}

impl ClientConfig {
    /// Create a new client configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the client configuration from the environment configuration.
    ///
    /// The prediction model becomes the default chat model; reward queries
    /// name their model per request.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout_ms: config.request_timeout_ms,
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
            model: config.prediction_model.clone(),
            embedding_model: config.embedding_model.clone(),
        }
    }

    /// Set base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set timeout in milliseconds.
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set maximum retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set retry delay in milliseconds.
    #[must_use]
    pub const fn with_retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Set the default chat model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the embedding model.
    #[must_use]
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            model: DEFAULT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretString;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new()
            .with_base_url("http://localhost:9000")
            .with_timeout_ms(5_000)
            .with_max_retries(1)
            .with_retry_delay_ms(10)
            .with_model("gpt-4o")
            .with_embedding_model("text-embedding-3-small");
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.timeout_ms, 5_000);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_delay_ms, 10);
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.embedding_model, "text-embedding-3-small");
    }

    #[test]
    fn test_client_config_from_config_trims_slash() {
        let config = Config {
            api_key: SecretString::new("k"),
            base_url: "http://localhost:8080/v1/".into(),
            prediction_model: "pred".into(),
            reward_model: "rew".into(),
            embedding_model: "emb".into(),
            log_level: "info".into(),
            request_timeout_ms: 2_000,
            max_retries: 4,
            retry_delay_ms: 50,
        };
        let client = ClientConfig::from_config(&config);
        assert_eq!(client.base_url, "http://localhost:8080/v1");
        assert_eq!(client.model, "pred");
        assert_eq!(client.embedding_model, "emb");
        assert_eq!(client.max_retries, 4);
        assert_eq!(client.retry_delay_ms, 50);
    }
}
