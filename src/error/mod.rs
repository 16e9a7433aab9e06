//! Error types for the catalyst search engine.
//!
//! This module defines a hierarchical error system:
//! - [`AppError`]: Top-level application errors
//! - [`LlmError`]: Language-model API errors
//! - [`StateError`]: Search-state prompt/answer errors
//! - [`PolicyError`]: Action generation errors
//! - [`RewardError`]: Reward evaluation errors
//! - [`CheckpointError`]: Tree persistence errors
//! - [`SearchError`]: Errors that abort a single search step
//! - [`ConfigError`]: Configuration errors
//!
//! All errors implement `Send + Sync` for async compatibility.

use thiserror::Error;

/// Top-level application error.
///
/// This is the main error type returned by the driver. It wraps all
/// subsystem errors for unified error handling.
#[derive(Debug, Error)]
pub enum AppError {
    /// Language-model API error.
    #[error("LLM API error: {0}")]
    Llm(#[from] LlmError),

    /// Search step error.
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// Checkpoint error.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dataset loading error.
    #[error("Dataset error: {message}")]
    Dataset {
        /// Description of the dataset failure.
        message: String,
    },
}

/// Language-model API errors.
///
/// These errors represent failures when communicating with the chat-completion
/// or embedding endpoints.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Authentication failed due to invalid API key.
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    /// Request was rate limited.
    #[error("Rate limited: retry after {retry_after_seconds}s")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_seconds: u64,
    },

    /// The deployment is overloaded.
    #[error("Model overloaded: {model}")]
    ModelOverloaded {
        /// The model that is overloaded.
        model: String,
    },

    /// Request timed out.
    #[error("Request timeout after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Invalid request parameters.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of what's invalid.
        message: String,
    },

    /// Network communication error.
    #[error("Network error: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// Unexpected response from the API.
    #[error("Unexpected response: {message}")]
    UnexpectedResponse {
        /// Description of what was unexpected.
        message: String,
    },
}

impl LlmError {
    /// Returns true if this error is retryable.
    ///
    /// Rate limiting, overload, timeout and network errors are retryable.
    /// Authentication and invalid request errors are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ModelOverloaded { .. }
                | Self::Timeout { .. }
                | Self::Network { .. }
        )
    }
}

/// Search-state errors.
///
/// Raised while building prompts for a state or interpreting the model's answers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The state has not been queried yet.
    #[error("State has no answer yet")]
    MissingAnswer,

    /// A candidate list was given without a relation phrase.
    #[error("Non-empty candidate list {candidates:?} given without a relation to the candidate list")]
    MissingRelation {
        /// The dangling candidate list.
        candidates: Vec<String>,
    },

    /// The model answer could not be parsed.
    #[error("Failed to parse answer: {message}")]
    Parse {
        /// Description of the parse failure.
        message: String,
    },

    /// The model query failed.
    #[error("Query failed: {message}")]
    Query {
        /// Description of the query failure.
        message: String,
    },

    /// A persisted state could not be reconstructed.
    #[error("Failed to reconstruct state: {message}")]
    Deserialize {
        /// Description of the failure.
        message: String,
    },
}

impl From<LlmError> for StateError {
    fn from(err: LlmError) -> Self {
        Self::Query {
            message: err.to_string(),
        }
    }
}

/// Policy errors.
///
/// Raised while generating candidate actions or materialising successors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PolicyError {
    /// Generating a successor answer failed.
    #[error("Successor generation failed: {0}")]
    Generation(#[from] StateError),

    /// Computing similarity scores failed.
    #[error("Similarity computation failed: {message}")]
    Similarity {
        /// Description of the failure.
        message: String,
    },

    /// Priors were malformed (wrong length, negative or non-finite).
    #[error("Invalid priors: {reason}")]
    InvalidPriors {
        /// Why the priors are invalid.
        reason: String,
    },
}

/// Reward evaluation errors.
///
/// Recoverable evaluation failures are converted to a penalty value by the
/// reward functions themselves; the variants here are the ones that propagate.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RewardError {
    /// The input to aggregation was malformed (non-finite energies, length mismatch).
    #[error("Malformed reward input: {reason}")]
    MalformedInput {
        /// Why the input is malformed.
        reason: String,
    },

    /// The structure calculator failed.
    #[error("Calculator failed: {message}")]
    Calculator {
        /// Description of the failure.
        message: String,
    },

    /// Reading or writing the result cache failed.
    #[error("Result cache failed: {message}")]
    Cache {
        /// Description of the failure.
        message: String,
    },

    /// A language-model query issued by the reward function failed.
    #[error("Reward query failed: {message}")]
    Query {
        /// Description of the failure.
        message: String,
    },
}

impl From<StateError> for RewardError {
    fn from(err: StateError) -> Self {
        Self::Query {
            message: err.to_string(),
        }
    }
}

/// Checkpoint errors.
///
/// Raised while persisting or restoring a search tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    /// Filesystem error.
    #[error("I/O error on {path}: {message}")]
    Io {
        /// The path involved.
        path: String,
        /// Description of the failure.
        message: String,
    },

    /// The tree could not be serialized.
    #[error("Serialization failed: {message}")]
    Serialize {
        /// Description of the failure.
        message: String,
    },

    /// The document could not be parsed.
    #[error("Deserialization failed: {message}")]
    Deserialize {
        /// Description of the failure.
        message: String,
    },

    /// The checkpoint was written with a different configuration.
    #[error("Configuration mismatch for {field}: expected {expected}, found {found}")]
    ConfigMismatch {
        /// The mismatching field.
        field: String,
        /// The value requested by the caller.
        expected: String,
        /// The value stored in the checkpoint.
        found: String,
    },

    /// The document violates a structural invariant.
    #[error("Corrupt checkpoint: {reason}")]
    Corrupt {
        /// Which invariant is violated.
        reason: String,
    },
}

/// Search step errors.
///
/// Any of these aborts the current step; the last checkpoint stays on disk.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SearchError {
    /// Action generation failed.
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Reward evaluation failed.
    #[error("Reward error: {0}")]
    Reward(#[from] RewardError),

    /// Persisting the tree failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// State handling failed.
    #[error("State error: {0}")]
    State(#[from] StateError),
}

/// Configuration errors.
///
/// These errors represent failures in configuration loading and validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required configuration is missing.
    #[error("Missing required: {var}")]
    MissingRequired {
        /// The missing variable name.
        var: String,
    },

    /// Configuration value is invalid.
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue {
        /// The variable name.
        var: String,
        /// Why the value is invalid.
        reason: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(AppError: Send, Sync, std::error::Error);
    assert_impl_all!(LlmError: Send, Sync, std::error::Error, Clone);
    assert_impl_all!(StateError: Send, Sync, std::error::Error, Clone);
    assert_impl_all!(PolicyError: Send, Sync, std::error::Error, Clone);
    assert_impl_all!(RewardError: Send, Sync, std::error::Error, Clone);
    assert_impl_all!(CheckpointError: Send, Sync, std::error::Error, Clone);
    assert_impl_all!(SearchError: Send, Sync, std::error::Error, Clone);
    assert_impl_all!(ConfigError: Send, Sync, std::error::Error, Clone);

    #[test]
    fn test_app_error_display_llm() {
        let err = AppError::Llm(LlmError::AuthenticationFailed);
        assert_eq!(
            err.to_string(),
            "LLM API error: Authentication failed: invalid API key"
        );
    }

    #[test]
    fn test_app_error_display_config() {
        let err = AppError::Config(ConfigError::MissingRequired {
            var: "LLM_API_KEY".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required: LLM_API_KEY"
        );
    }

    #[test]
    fn test_llm_error_retryable() {
        assert!(LlmError::RateLimited {
            retry_after_seconds: 5
        }
        .is_retryable());
        assert!(LlmError::Timeout { timeout_ms: 100 }.is_retryable());
        assert!(LlmError::Network {
            message: "reset".into()
        }
        .is_retryable());
        assert!(LlmError::ModelOverloaded {
            model: "gpt-4".into()
        }
        .is_retryable());
        assert!(!LlmError::AuthenticationFailed.is_retryable());
        assert!(!LlmError::InvalidRequest {
            message: "bad".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_state_error_from_llm_error() {
        let err: StateError = LlmError::Timeout { timeout_ms: 10 }.into();
        assert!(matches!(err, StateError::Query { message } if message.contains("10ms")));
    }

    #[test]
    fn test_search_error_from_reward_error() {
        let err: SearchError = RewardError::MalformedInput {
            reason: "NaN energy".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Reward error: Malformed reward input: NaN energy"
        );
    }

    #[test]
    fn test_config_mismatch_display() {
        let err = CheckpointError::ConfigMismatch {
            field: "num_keep".into(),
            expected: "4".into(),
            found: "2".into(),
        };
        assert_eq!(
            err.to_string(),
            "Configuration mismatch for num_keep: expected 4, found 2"
        );
    }
}
