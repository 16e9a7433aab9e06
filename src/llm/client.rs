//! Chat-completion and embedding client with retry logic.
//!
//! This module provides:
//! - HTTP client for an OpenAI-compatible API
//! - Retry logic with exponential backoff
//! - Per-instance usage counters
//! - Concurrent batch completion

#![allow(clippy::missing_errors_doc)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::config::{ClientConfig, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TOP_P};
use super::types::{
    ApiUsage, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, UsageSnapshot,
};
use crate::config::SecretString;
use crate::error::LlmError;
use crate::traits::{
    CompletionConfig, CompletionResponse, EmbeddingClientTrait, LlmClientTrait, Message,
};

/// Maximum content length per message (50KB).
pub const MAX_CONTENT_LENGTH: usize = 50_000;

/// Model API client.
///
/// Counters are owned by the instance, so independent searches sharing a
/// process do not see each other's usage.
#[derive(Debug)]
pub struct LlmClient {
    client: Client,
    api_key: SecretString,
    config: ClientConfig,
    queries: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl LlmClient {
    /// Create a new client.
    pub fn new(api_key: impl Into<SecretString>, config: ClientConfig) -> Result<Self, LlmError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Network {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            config,
            queries: AtomicU64::new(0),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
        })
    }

    /// Create a client with default configuration.
    pub fn with_api_key(api_key: impl Into<SecretString>) -> Result<Self, LlmError> {
        Self::new(api_key, ClientConfig::default())
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Get the client configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Number of successful requests sent by this client.
    #[must_use]
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Prompt tokens sent by this client.
    #[must_use]
    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens.load(Ordering::Relaxed)
    }

    /// Completion tokens received by this client.
    #[must_use]
    pub fn completion_tokens(&self) -> u64 {
        self.completion_tokens.load(Ordering::Relaxed)
    }

    /// All counters at once.
    #[must_use]
    pub fn usage_snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            queries: self.queries(),
            prompt_tokens: self.prompt_tokens(),
            completion_tokens: self.completion_tokens(),
        }
    }

    async fn chat(
        &self,
        messages: Vec<Message>,
        config: CompletionConfig,
    ) -> Result<CompletionResponse, LlmError> {
        Self::validate_messages(&messages)?;

        let mut all_messages = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = config.system_prompt {
            all_messages.push(Message::system(system));
        }
        all_messages.extend(messages);

        let model = config.model.unwrap_or_else(|| self.config.model.clone());
        let request = ChatRequest {
            model: model.clone(),
            messages: all_messages,
            temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: config.top_p.unwrap_or(DEFAULT_TOP_P),
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        };

        let response: ChatResponse = self
            .execute_with_retry("chat/completions", &request, &model)
            .await?;
        self.record_usage(response.usage);

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::UnexpectedResponse {
                message: "No content in response".to_string(),
            })?;

        tracing::debug!(
            model = %model,
            queries = self.queries(),
            prompt_tokens = self.prompt_tokens(),
            completion_tokens = self.completion_tokens(),
            "Completion received"
        );

        Ok(CompletionResponse::new(content, response.usage.into()))
    }

    async fn embeddings(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let model = self.config.embedding_model.clone();
        let request = EmbeddingRequest {
            model: model.clone(),
            input: texts,
        };

        let response: EmbeddingResponse = self
            .execute_with_retry("embeddings", &request, &model)
            .await?;
        self.record_usage(response.usage);

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        if data.len() != expected || data.iter().enumerate().any(|(i, d)| d.index != i) {
            return Err(LlmError::UnexpectedResponse {
                message: format!(
                    "Expected {expected} embeddings, received {}",
                    data.len()
                ),
            });
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn record_usage(&self, usage: ApiUsage) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens
            .fetch_add(u64::from(usage.prompt_tokens), Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(u64::from(usage.completion_tokens), Ordering::Relaxed);
    }

    /// Validate request size limits.
    fn validate_messages(messages: &[Message]) -> Result<(), LlmError> {
        if messages.is_empty() {
            return Err(LlmError::InvalidRequest {
                message: "No messages".to_string(),
            });
        }
        for msg in messages {
            if msg.content.len() > MAX_CONTENT_LENGTH {
                return Err(LlmError::InvalidRequest {
                    message: format!(
                        "Message too large: {} > {MAX_CONTENT_LENGTH}",
                        msg.content.len()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Execute request with retry logic.
    async fn execute_with_retry<Req, Resp>(
        &self,
        endpoint: &str,
        request: &Req,
        model: &str,
    ) -> Result<Resp, LlmError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let mut last_error = None;
        let mut delay = self.config.retry_delay_ms;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // A rate limit with an advertised wait takes precedence over the backoff.
                let wait = match &last_error {
                    Some(LlmError::RateLimited {
                        retry_after_seconds,
                    }) => delay.max(retry_after_seconds.saturating_mul(1000)),
                    _ => delay,
                };
                tracing::warn!(attempt, delay_ms = wait, endpoint, "Retrying model request");
                tokio::time::sleep(Duration::from_millis(wait)).await;
                delay = delay.saturating_mul(2);
            }

            match self.execute_once(endpoint, request, model).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    tracing::warn!(error = %e, attempt, "Retryable error occurred");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Network {
            message: "Unknown error after retries".to_string(),
        }))
    }

    /// Execute a single request attempt.
    async fn execute_once<Req, Resp>(
        &self,
        endpoint: &str,
        request: &Req,
        model: &str,
    ) -> Result<Resp, LlmError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{endpoint}", self.config.base_url);
        let start = std::time::Instant::now();

        tracing::debug!(
            url = %url,
            model = %model,
            timeout_ms = self.config.timeout_ms,
            "Starting model API request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                #[allow(clippy::cast_possible_truncation)]
                let elapsed_ms = start.elapsed().as_millis() as u64;
                if e.is_timeout() {
                    tracing::error!(url = %url, elapsed_ms, "Model API request timed out");
                    LlmError::Timeout {
                        timeout_ms: self.config.timeout_ms,
                    }
                } else {
                    tracing::error!(url = %url, elapsed_ms, error = %e, "Model API request failed");
                    LlmError::Network {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        tracing::debug!(url = %url, status = %status, "Model API response received");

        match status.as_u16() {
            401 | 403 => return Err(LlmError::AuthenticationFailed),
            429 => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0);
                return Err(LlmError::RateLimited {
                    retry_after_seconds: retry_after,
                });
            }
            500 | 502 | 503 | 529 => {
                return Err(LlmError::ModelOverloaded {
                    model: model.to_string(),
                });
            }
            400 | 404 | 422 => {
                let body = response.text().await.unwrap_or_default();
                return Err(LlmError::InvalidRequest {
                    message: format!("Status {status}: {body}"),
                });
            }
            _ => {}
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::UnexpectedResponse {
                message: format!("Status {status}: {body}"),
            });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::UnexpectedResponse {
                message: format!("Failed to parse response: {e}"),
            })
    }
}

// ============================================================================
// Trait implementations
// ============================================================================

/// Run several completions concurrently, returning responses in input order.
///
/// Fails with the first error encountered.
///
/// # Errors
///
/// Returns the first [`LlmError`] any request fails with.
pub async fn complete_many<C>(
    client: &C,
    requests: Vec<(Vec<Message>, CompletionConfig)>,
) -> Result<Vec<CompletionResponse>, LlmError>
where
    C: LlmClientTrait + ?Sized,
{
    tracing::debug!(count = requests.len(), "Starting concurrent completions");
    try_join_all(
        requests
            .into_iter()
            .map(|(messages, config)| client.complete(messages, config)),
    )
    .await
}

#[async_trait]
impl LlmClientTrait for LlmClient {
    async fn complete(
        &self,
        messages: Vec<Message>,
        config: CompletionConfig,
    ) -> Result<CompletionResponse, LlmError> {
        self.chat(messages, config).await
    }
}

#[async_trait]
impl EmbeddingClientTrait for LlmClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>, LlmError> {
        self.embeddings(texts).await
    }
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
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_mock_client(server: &MockServer) -> LlmClient {
        let config = ClientConfig::default()
            .with_base_url(server.uri())
            .with_max_retries(0)
            .with_timeout_ms(5_000);
        LlmClient::new("test-api-key", config).unwrap()
    }

    fn success_response_body(text: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": text}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30}
        })
    }

    #[test]
    fn test_client_new() {
        let client = LlmClient::with_api_key("test-key").unwrap();
        assert_eq!(client.base_url(), "https://api.openai.com/v1");
        assert_eq!(client.usage_snapshot(), UsageSnapshot::default());
    }

    #[test]
    fn test_client_debug_redacts_key() {
        let client = LlmClient::with_api_key("sk-proj-hidden").unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("LlmClient"));
        assert!(!debug.contains("sk-proj-hidden"));
    }

    #[tokio::test]
    async fn test_complete_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-api-key"))
            .and(body_partial_json(json!({
                "model": "gpt-4",
                "temperature": 0.7,
                "max_tokens": 800,
                "messages": [
                    {"role": "system", "content": "You are a catalysis expert."},
                    {"role": "user", "content": "Hello"}
                ]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(success_response_body("final_answer: [Pt]")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = create_mock_client(&server);
        let response = client
            .complete(
                vec![Message::user("Hello")],
                CompletionConfig::new().with_system_prompt("You are a catalysis expert."),
            )
            .await
            .unwrap();

        assert_eq!(response.content, "final_answer: [Pt]");
        assert_eq!(response.usage.total(), 30);
        assert_eq!(client.queries(), 1);
        assert_eq!(client.prompt_tokens(), 10);
        assert_eq!(client.completion_tokens(), 20);
    }

    #[tokio::test]
    async fn test_complete_uses_requested_model() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "reward-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_response_body("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let client = create_mock_client(&server);
        let response = client
            .complete(
                vec![Message::user("Hi")],
                CompletionConfig::new().with_model("reward-model"),
            )
            .await
            .unwrap();
        assert_eq!(response.content, "ok");
    }

    #[tokio::test]
    async fn test_counters_are_per_instance() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_response_body("ok")))
            .mount(&server)
            .await;

        let first = create_mock_client(&server);
        let second = create_mock_client(&server);
        first
            .complete(vec![Message::user("a")], CompletionConfig::new())
            .await
            .unwrap();
        first
            .complete(vec![Message::user("b")], CompletionConfig::new())
            .await
            .unwrap();

        assert_eq!(first.queries(), 2);
        assert_eq!(second.queries(), 0);
    }

    #[tokio::test]
    async fn test_complete_many_preserves_order() {
        let server = MockServer::start().await;
        for word in ["alpha", "beta", "gamma"] {
            Mock::given(method("POST"))
                .and(path("/chat/completions"))
                .and(body_partial_json(json!({
                    "messages": [{"role": "user", "content": word}]
                })))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(success_response_body(word)),
                )
                .mount(&server)
                .await;
        }

        let client = create_mock_client(&server);
        let requests = ["alpha", "beta", "gamma"]
            .into_iter()
            .map(|w| (vec![Message::user(w)], CompletionConfig::new()))
            .collect();
        let responses = complete_many(&client, requests).await.unwrap();

        let contents: Vec<_> = responses.into_iter().map(|r| r.content).collect();
        assert_eq!(contents, vec!["alpha", "beta", "gamma"]);
        assert_eq!(client.queries(), 3);
    }

    #[tokio::test]
    async fn test_complete_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = create_mock_client(&server);
        let result = client
            .complete(vec![Message::user("Hi")], CompletionConfig::new())
            .await;
        assert!(matches!(result, Err(LlmError::AuthenticationFailed)));
        assert_eq!(client.queries(), 0);
    }

    #[tokio::test]
    async fn test_complete_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).append_header("retry-after", "30"))
            .mount(&server)
            .await;

        let client = create_mock_client(&server);
        let result = client
            .complete(vec![Message::user("Hi")], CompletionConfig::new())
            .await;
        match result {
            Err(LlmError::RateLimited {
                retry_after_seconds,
            }) => assert_eq!(retry_after_seconds, 30),
            other => panic!("Expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_complete_bad_request_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .expect(1)
            .mount(&server)
            .await;

        let config = ClientConfig::default()
            .with_base_url(server.uri())
            .with_max_retries(3)
            .with_retry_delay_ms(10);
        let client = LlmClient::new("test-key", config).unwrap();
        let err = client
            .complete(vec![Message::user("Hi")], CompletionConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest { ref message } if message.contains("bad model")));
    }

    #[tokio::test]
    async fn test_complete_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client = create_mock_client(&server);
        let result = client
            .complete(vec![Message::user("Hi")], CompletionConfig::new())
            .await;
        assert!(matches!(result, Err(LlmError::UnexpectedResponse { .. })));
    }

    #[tokio::test]
    async fn test_validate_message_too_large() {
        let server = MockServer::start().await;
        let client = create_mock_client(&server);

        let result = client
            .complete(
                vec![Message::user("x".repeat(MAX_CONTENT_LENGTH + 1))],
                CompletionConfig::new(),
            )
            .await;
        assert!(matches!(result, Err(LlmError::InvalidRequest { .. })));
    }

    #[tokio::test]
    async fn test_retry_on_rate_limit() {
        let server = MockServer::start().await;
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_clone = Arc::clone(&call_count);

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(move |_req: &wiremock::Request| {
                let count = call_count_clone.fetch_add(1, Ordering::SeqCst);
                if count == 0 {
                    ResponseTemplate::new(429)
                } else {
                    ResponseTemplate::new(200).set_body_json(success_response_body("Success!"))
                }
            })
            .mount(&server)
            .await;

        let config = ClientConfig::default()
            .with_base_url(server.uri())
            .with_max_retries(1)
            .with_retry_delay_ms(10);
        let client = LlmClient::new("test-key", config).unwrap();

        let response = client
            .complete(vec![Message::user("Hi")], CompletionConfig::new())
            .await
            .unwrap();
        assert_eq!(response.content, "Success!");
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_max_retries_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let config = ClientConfig::default()
            .with_base_url(server.uri())
            .with_max_retries(2)
            .with_retry_delay_ms(10);
        let client = LlmClient::new("test-key", config).unwrap();

        let result = client
            .complete(vec![Message::user("Hi")], CompletionConfig::new())
            .await;
        assert!(matches!(result, Err(LlmError::ModelOverloaded { .. })));
    }

    #[tokio::test]
    async fn test_embed_sorts_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(json!({
                "model": "text-embedding-ada-002",
                "input": ["platinum", "cobalt"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                    {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
                ],
                "usage": {"prompt_tokens": 4}
            })))
            .mount(&server)
            .await;

        let client = create_mock_client(&server);
        let vectors = client
            .embed(vec!["platinum".into(), "cobalt".into()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(client.prompt_tokens(), 4);
    }

    #[tokio::test]
    async fn test_embed_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [1.0]}]
            })))
            .mount(&server)
            .await;

        let client = create_mock_client(&server);
        let result = client.embed(vec!["a".into(), "b".into()]).await;
        assert!(matches!(result, Err(LlmError::UnexpectedResponse { .. })));
    }

    #[tokio::test]
    async fn test_embed_empty_input_skips_request() {
        let server = MockServer::start().await;
        let client = create_mock_client(&server);
        assert!(client.embed(Vec::new()).await.unwrap().is_empty());
        assert_eq!(client.queries(), 0);
    }
}
