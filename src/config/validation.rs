//! Configuration validation.
//!
//! This module provides validation logic for configuration values,
//! ensuring they are within acceptable ranges.

use super::{Config, SearchConfig};
use crate::error::ConfigError;

/// Minimum allowed timeout in milliseconds (1 second).
pub const MIN_TIMEOUT_MS: u64 = 1000;

/// Maximum allowed timeout in milliseconds (5 minutes).
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// Maximum allowed retry count.
pub const MAX_RETRIES: u32 = 10;

fn invalid(var: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.into(),
        reason: reason.into(),
    }
}

/// Validate model client configuration values.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if any value is out of range:
/// - `LLM_API_KEY` must not be blank
/// - `LLM_BASE_URL` must be an http(s) URL
/// - `REQUEST_TIMEOUT_MS` must be between 1000 and 300000
/// - `MAX_RETRIES` must be between 0 and 10
#[must_use = "validation result should be checked"]
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.api_key.is_blank() {
        return Err(invalid("LLM_API_KEY", "must not be empty"));
    }

    if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
        return Err(invalid("LLM_BASE_URL", "must start with http:// or https://"));
    }

    if config.request_timeout_ms < MIN_TIMEOUT_MS || config.request_timeout_ms > MAX_TIMEOUT_MS {
        return Err(invalid(
            "REQUEST_TIMEOUT_MS",
            format!("must be between {MIN_TIMEOUT_MS} and {MAX_TIMEOUT_MS} ms"),
        ));
    }

    if config.max_retries > MAX_RETRIES {
        return Err(invalid(
            "MAX_RETRIES",
            format!("must be between 0 and {MAX_RETRIES}"),
        ));
    }

    Ok(())
}

/// Validate a search-run configuration.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] naming the offending flag when:
/// - `num-keep`, `num-generate` or `depth` is zero
/// - `penalty-value` is not negative
/// - `reward-max-attempts` is zero
/// - `gnn-fmax` or `gnn-batch-size` is not positive
/// - `temperature` is not positive
/// - `discount-factor` is outside (0, 1]
/// - `exploration-constant` is negative
#[must_use = "validation result should be checked"]
pub fn validate_search_config(config: &SearchConfig) -> Result<(), ConfigError> {
    if config.num_keep == 0 {
        return Err(invalid("num-keep", "must be greater than 0"));
    }
    if config.num_generate == 0 {
        return Err(invalid("num-generate", "must be greater than 0"));
    }
    if config.depth == 0 {
        return Err(invalid("depth", "must be greater than 0"));
    }
    if !(config.penalty_value.is_finite() && config.penalty_value < 0.0) {
        return Err(invalid("penalty-value", "must be a negative number"));
    }
    if config.reward_max_attempts == 0 {
        return Err(invalid("reward-max-attempts", "must be greater than 0"));
    }
    if !config.reward_limit.is_finite() {
        return Err(invalid("reward-limit", "must be finite"));
    }
    if !(config.gnn_fmax.is_finite() && config.gnn_fmax > 0.0) {
        return Err(invalid("gnn-fmax", "must be greater than 0"));
    }
    if config.gnn_batch_size == 0 {
        return Err(invalid("gnn-batch-size", "must be greater than 0"));
    }
    if config.num_adslab_samples == 0 {
        return Err(invalid("num-adslab-samples", "must be greater than 0"));
    }
    if !(config.temperature.is_finite() && config.temperature > 0.0) {
        return Err(invalid("temperature", "must be greater than 0"));
    }
    if !(config.discount_factor > 0.0 && config.discount_factor <= 1.0) {
        return Err(invalid("discount-factor", "must be in (0, 1]"));
    }
    if !(config.exploration_constant.is_finite() && config.exploration_constant >= 0.0) {
        return Err(invalid("exploration-constant", "must be non-negative"));
    }
    Ok(())
}
