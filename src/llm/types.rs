//! Wire types for the chat-completion and embedding endpoints.

#![allow(clippy::derive_partial_eq_without_eq)]

use serde::{Deserialize, Serialize};

use crate::traits::{Message, Usage};

/// Request body for `POST /chat/completions`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRequest {
    /// Model or deployment name.
    pub model: String,
    /// Conversation messages, system prompt first.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

/// Response body of `POST /chat/completions`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChatResponse {
    /// Generated choices; only the first is used.
    pub choices: Vec<ChatChoice>,
    /// Token accounting.
    #[serde(default)]
    pub usage: ApiUsage,
}

/// One generated choice.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChatChoice {
    /// The generated message.
    pub message: ChoiceMessage,
}

/// Message inside a choice. Content may be null for filtered responses.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChoiceMessage {
    /// Generated text.
    #[serde(default)]
    pub content: Option<String>,
}

/// Token usage as reported by the API.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct ApiUsage {
    /// Prompt tokens.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Completion tokens.
    #[serde(default)]
    pub completion_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(usage: ApiUsage) -> Self {
        Self::new(usage.prompt_tokens, usage.completion_tokens)
    }
}

/// Request body for `POST /embeddings`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EmbeddingRequest {
    /// Embedding model.
    pub model: String,
    /// Texts to embed.
    pub input: Vec<String>,
}

/// Response body of `POST /embeddings`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EmbeddingResponse {
    /// One entry per input text, possibly out of order.
    pub data: Vec<EmbeddingData>,
    /// Token accounting.
    #[serde(default)]
    pub usage: ApiUsage,
}

/// One embedding vector.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EmbeddingData {
    /// Position of the input this vector belongs to.
    pub index: usize,
    /// The vector.
    pub embedding: Vec<f64>,
}

/// Running totals of client usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Successful requests sent.
    pub queries: u64,
    /// Prompt tokens sent.
    pub prompt_tokens: u64,
    /// Completion tokens received.
    pub completion_tokens: u64,
}
