//! Configuration management.
//!
//! This module handles:
//! - Environment variable loading for the model client ([`Config`])
//! - Search-run configuration with closed selector enums ([`SearchConfig`])
//! - Configuration validation
//! - Secure API key storage via [`SecretString`]
//!
//! # Example
//!
//! ```
//! use catalyst_search::config::{Config, SecretString, DEFAULT_PREDICTION_MODEL};
//!
//! // Create a config directly (use Config::from_env() in production)
//! let config = Config {
//!     api_key: SecretString::new("sk-proj-example-key"),
//!     base_url: "https://api.openai.com/v1".to_string(),
//!     prediction_model: DEFAULT_PREDICTION_MODEL.to_string(),
//!     reward_model: DEFAULT_PREDICTION_MODEL.to_string(),
//!     embedding_model: "text-embedding-ada-002".to_string(),
//!     log_level: "info".to_string(),
//!     request_timeout_ms: 60_000,
//!     max_retries: 3,
//!     retry_delay_ms: 1_000,
//! };
//!
//! // API key is protected from accidental logging
//! let debug = format!("{:?}", config);
//! assert!(debug.contains("<REDACTED>"));
//! assert!(!debug.contains("sk-proj-example-key"));
//! ```

mod search;
mod secret;
mod validation;

pub use search::{
    GnnDevice, PlacementKind, PolicyKind, RewardKind, RewardPolarity, SearchConfig, SearchMethod,
};
pub use secret::SecretString;
pub use validation::{
    validate_config, validate_search_config, MAX_RETRIES, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS,
};

use crate::error::ConfigError;

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model for candidate generation.
pub const DEFAULT_PREDICTION_MODEL: &str = "gpt-4";

/// Default model for reward queries.
pub const DEFAULT_REWARD_MODEL: &str = "gpt-4";

/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;

/// Default maximum retry attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default initial backoff delay in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Model client configuration.
///
/// Use [`Config::from_env`] to load configuration from environment variables.
/// The `api_key` field uses [`SecretString`] to prevent accidental logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// API key (protected from logging via [`SecretString`]).
    pub api_key: SecretString,
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    /// Model used to generate candidate answers.
    pub prediction_model: String,
    /// Model used to estimate adsorption energies.
    pub reward_model: String,
    /// Model used to embed prompts and answers.
    pub embedding_model: String,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: String,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Maximum retry attempts.
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds.
    pub retry_delay_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `LLM_API_KEY`: API key
    ///
    /// Optional environment variables (with defaults):
    /// - `LLM_BASE_URL` (default: `https://api.openai.com/v1`)
    /// - `PREDICTION_MODEL` (default: `gpt-4`)
    /// - `REWARD_MODEL` (default: `gpt-4`)
    /// - `EMBEDDING_MODEL` (default: `text-embedding-ada-002`)
    /// - `LOG_LEVEL` (default: `info`)
    /// - `REQUEST_TIMEOUT_MS` (default: `60000`)
    /// - `MAX_RETRIES` (default: `3`)
    /// - `RETRY_DELAY_MS` (default: `1000`)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `LLM_API_KEY` is missing, a numeric variable
    /// does not parse, or a value fails validation (see [`validate_config`]).
    #[must_use = "configuration should be used"]
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let api_key = std::env::var("LLM_API_KEY").map_err(|_| ConfigError::MissingRequired {
            var: "LLM_API_KEY".into(),
        })?;

        let config = Self {
            api_key: SecretString::new(api_key),
            base_url: env_or("LLM_BASE_URL", DEFAULT_BASE_URL),
            prediction_model: env_or("PREDICTION_MODEL", DEFAULT_PREDICTION_MODEL),
            reward_model: env_or("REWARD_MODEL", DEFAULT_REWARD_MODEL),
            embedding_model: env_or("EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            log_level: env_or("LOG_LEVEL", DEFAULT_LOG_LEVEL),
            request_timeout_ms: parse_env_u64("REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?,
            max_retries: parse_env_u32("MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            retry_delay_ms: parse_env_u64("RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS)?,
        };

        validate_config(&config)?;
        Ok(config)
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

/// Parse an environment variable as u64, using a default if not set.
fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    std::env::var(name).map_or(Ok(default), |val| {
        val.parse().map_err(|_| ConfigError::InvalidValue {
            var: name.into(),
            reason: "must be a positive integer".into(),
        })
    })
}

/// Parse an environment variable as u32, using a default if not set.
fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    std::env::var(name).map_or(Ok(default), |val| {
        val.parse().map_err(|_| ConfigError::InvalidValue {
            var: name.into(),
            reason: "must be a positive integer".into(),
        })
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: [&str; 9] = [
        "LLM_API_KEY",
        "LLM_BASE_URL",
        "PREDICTION_MODEL",
        "REWARD_MODEL",
        "EMBEDDING_MODEL",
        "LOG_LEVEL",
        "REQUEST_TIMEOUT_MS",
        "MAX_RETRIES",
        "RETRY_DELAY_MS",
    ];

    fn setup_test_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_from_env_with_all_vars() {
        setup_test_env();

        env::set_var("LLM_API_KEY", "sk-proj-test-key");
        env::set_var("LLM_BASE_URL", "http://localhost:8080/v1");
        env::set_var("PREDICTION_MODEL", "gpt-4o");
        env::set_var("REWARD_MODEL", "gpt-4o-mini");
        env::set_var("EMBEDDING_MODEL", "text-embedding-3-small");
        env::set_var("LOG_LEVEL", "debug");
        env::set_var("REQUEST_TIMEOUT_MS", "30000");
        env::set_var("MAX_RETRIES", "5");
        env::set_var("RETRY_DELAY_MS", "250");

        let config = Config::from_env().expect("should load config");

        assert_eq!(config.api_key.expose(), "sk-proj-test-key");
        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert_eq!(config.prediction_model, "gpt-4o");
        assert_eq!(config.reward_model, "gpt-4o-mini");
        assert_eq!(config.embedding_model, "text-embedding-3-small");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.request_timeout_ms, 30_000);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay_ms, 250);

        setup_test_env();
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        setup_test_env();
        env::set_var("LLM_API_KEY", "sk-proj-test-key");

        let config = Config::from_env().expect("should load config");

        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.prediction_model, DEFAULT_PREDICTION_MODEL);
        assert_eq!(config.reward_model, DEFAULT_REWARD_MODEL);
        assert_eq!(config.embedding_model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.retry_delay_ms, DEFAULT_RETRY_DELAY_MS);

        setup_test_env();
    }

    #[test]
    #[serial]
    fn test_config_missing_api_key() {
        setup_test_env();

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingRequired { var } if var == "LLM_API_KEY"
        ));
    }

    #[test]
    #[serial]
    fn test_config_invalid_timeout_format() {
        setup_test_env();
        env::set_var("LLM_API_KEY", "sk-proj-test-key");
        env::set_var("REQUEST_TIMEOUT_MS", "not-a-number");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { var, .. } if var == "REQUEST_TIMEOUT_MS"
        ));

        setup_test_env();
    }

    #[test]
    #[serial]
    fn test_config_retries_validation_failure() {
        setup_test_env();
        env::set_var("LLM_API_KEY", "sk-proj-test-key");
        env::set_var("MAX_RETRIES", "20");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { var, .. } if var == "MAX_RETRIES"
        ));

        setup_test_env();
    }

    #[test]
    #[serial]
    fn test_config_blank_api_key_validation() {
        setup_test_env();
        env::set_var("LLM_API_KEY", "  ");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { var, .. } if var == "LLM_API_KEY"
        ));

        setup_test_env();
    }

    #[test]
    fn test_parse_env_u64_default_and_invalid() {
        env::remove_var("CATALYST_TEST_U64_MISSING");
        assert_eq!(parse_env_u64("CATALYST_TEST_U64_MISSING", 999).unwrap(), 999);

        env::set_var("CATALYST_TEST_U64_INVALID", "abc");
        assert!(parse_env_u64("CATALYST_TEST_U64_INVALID", 0).is_err());
        env::remove_var("CATALYST_TEST_U64_INVALID");
    }

    #[test]
    fn test_parse_env_u32_with_value() {
        env::set_var("CATALYST_TEST_U32", "42");
        assert_eq!(parse_env_u32("CATALYST_TEST_U32", 0).unwrap(), 42);
        env::remove_var("CATALYST_TEST_U32");
    }
}
