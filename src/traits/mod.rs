//! Trait definitions for mockable dependencies.
//!
//! This module defines traits for:
//! - [`LlmClientTrait`]: chat-completion client abstraction
//! - [`EmbeddingClientTrait`]: text-embedding client abstraction
//! - [`TimeProvider`]: Time abstraction for testing
//!
//! It also re-exports shared types from the `types` submodule.
//!
//! # Mocking
//!
//! All traits are annotated with `#[cfg_attr(test, mockall::automock)]`
//! which generates mock implementations automatically for testing.
//!
//! # Example
//!
//! ```
//! use catalyst_search::traits::{TimeProvider, RealTimeProvider};
//!
//! let time_provider = RealTimeProvider;
//! let now = time_provider.now();
//! println!("Current time: {now}");
//! ```

mod types;

pub use types::{CompletionConfig, CompletionResponse, Message, Usage};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::LlmError;

/// Chat-completion client trait for mocking.
///
/// Every query a search state issues goes through this trait, so states,
/// policies and reward functions can be exercised without a live model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClientTrait: Send + Sync {
    /// Send a completion request to the API.
    ///
    /// # Arguments
    ///
    /// * `messages` - The conversation messages
    /// * `config` - Completion configuration options
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] if the API call fails after the client's retries.
    async fn complete(
        &self,
        messages: Vec<Message>,
        config: CompletionConfig,
    ) -> Result<CompletionResponse, LlmError>;
}

/// Embedding client trait for mocking.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingClientTrait: Send + Sync {
    /// Embed each text, returning one vector per input in order.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] if the API call fails after the client's retries.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>, LlmError>;
}

#[async_trait]
impl<T: LlmClientTrait + ?Sized> LlmClientTrait for Arc<T> {
    async fn complete(
        &self,
        messages: Vec<Message>,
        config: CompletionConfig,
    ) -> Result<CompletionResponse, LlmError> {
        self.as_ref().complete(messages, config).await
    }
}

#[async_trait]
impl<T: EmbeddingClientTrait + ?Sized> EmbeddingClientTrait for Arc<T> {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>, LlmError> {
        self.as_ref().embed(texts).await
    }
}

/// Time provider trait for deterministic testing.
///
/// Search trees stamp their start/end times through this trait.
#[cfg_attr(test, mockall::automock)]
pub trait TimeProvider: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Real time provider using system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Convert a timestamp to fractional seconds since the Unix epoch.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn epoch_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::float_cmp
)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(RealTimeProvider: Send, Sync, Clone, Copy, Default);

    #[test]
    fn test_real_time_provider_now() {
        let provider = RealTimeProvider;
        let before = Utc::now();
        let now = provider.now();
        let after = Utc::now();
        assert!(now >= before);
        assert!(now <= after);
    }

    #[test]
    fn test_epoch_seconds() {
        let time = DateTime::from_timestamp(1_700_000_000, 500_000_000).unwrap();
        assert_eq!(epoch_seconds(time), 1_700_000_000.5);
    }

    #[tokio::test]
    async fn test_mock_llm_client() {
        let mut mock = MockLlmClientTrait::new();
        mock.expect_complete().returning(|_msgs, _config| {
            Ok(CompletionResponse::new("final_answer: [Pt]", Usage::new(10, 20)))
        });

        let result = mock
            .complete(vec![Message::user("Test")], CompletionConfig::new())
            .await;
        let response = result.unwrap();
        assert_eq!(response.content, "final_answer: [Pt]");
        assert_eq!(response.usage.total(), 30);
    }

    #[tokio::test]
    async fn test_arc_llm_client_delegates() {
        let mut mock = MockLlmClientTrait::new();
        mock.expect_complete()
            .times(1)
            .returning(|_msgs, _config| Err(LlmError::AuthenticationFailed));
        let client = Arc::new(mock);

        let result = client
            .complete(vec![Message::user("Test")], CompletionConfig::new())
            .await;
        assert!(matches!(result, Err(LlmError::AuthenticationFailed)));
    }

    #[tokio::test]
    async fn test_mock_embedding_client() {
        let mut mock = MockEmbeddingClientTrait::new();
        mock.expect_embed()
            .returning(|texts| Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect()));

        let vectors = mock.embed(vec!["a".into(), "b".into()]).await.unwrap();
        assert_eq!(vectors.len(), 2);
    }

    #[test]
    fn test_mock_time_provider() {
        let fixed_time = Utc::now() - chrono::Duration::days(1);
        let mut mock = MockTimeProvider::new();
        mock.expect_now().return_const(fixed_time);
        assert_eq!(mock.now(), fixed_time);
    }
}
