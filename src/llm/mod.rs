//! Language-model API client.
//!
//! This module provides:
//! - Chat completions against an OpenAI-compatible endpoint
//! - Text embeddings for similarity scoring
//! - Retry logic with exponential backoff
//! - Per-instance query and token counters
//!
//! # Example
//!
//! ```
//! use catalyst_search::llm::{ClientConfig, LlmClient};
//!
//! let config = ClientConfig::new()
//!     .with_base_url("http://localhost:8080/v1")
//!     .with_max_retries(1);
//! let client = LlmClient::new("sk-proj-example", config).unwrap();
//! assert_eq!(client.queries(), 0);
//! ```

mod client;
mod config;
mod types;

pub use client::{complete_many, LlmClient, MAX_CONTENT_LENGTH};
pub use config::{
    ClientConfig, DEFAULT_BASE_URL, DEFAULT_EMBEDDING_MODEL, DEFAULT_MAX_RETRIES,
    DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_RETRY_DELAY_MS, DEFAULT_TEMPERATURE,
    DEFAULT_TIMEOUT_MS, DEFAULT_TOP_P,
};
pub use types::{
    ApiUsage, ChatChoice, ChatRequest, ChatResponse, ChoiceMessage, EmbeddingData,
    EmbeddingRequest, EmbeddingResponse, UsageSnapshot,
};
