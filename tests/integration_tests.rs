//! Integration tests for catalyst search.
//!
//! These tests verify end-to-end workflows including:
//! - Configuration handling
//! - Dataset loading into root states
//! - A full beam step against a mocked chat-completion API

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::io::Write;
use std::sync::Arc;

use serde_json::json;
use serial_test::serial;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use catalyst_search::config::{Config, SearchConfig};
use catalyst_search::dataset::{load_dataset, make_state};
use catalyst_search::driver::{build_policy, build_reward, checkpoint_path, restore_or_create, run_search, SearchOutcome};
use catalyst_search::error::ConfigError;
use catalyst_search::llm::{ClientConfig, LlmClient};
use catalyst_search::search::read_document;

// ============================================================================
// Test Utilities
// ============================================================================

fn chat_body(text: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": text}}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20}
    })
}

fn mock_client(server: &MockServer) -> Arc<LlmClient> {
    let config = ClientConfig::default()
        .with_base_url(server.uri())
        .with_max_retries(0)
        .with_timeout_ms(5_000);
    Arc::new(LlmClient::new("test-api-key", config).unwrap())
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
#[serial]
fn test_config_requires_api_key() {
    std::env::remove_var("LLM_API_KEY");
    let result = Config::from_env();
    assert!(matches!(result, Err(ConfigError::MissingRequired { ref var }) if var == "LLM_API_KEY"));
}

#[test]
#[serial]
fn test_config_from_env_defaults() {
    std::env::set_var("LLM_API_KEY", "sk-test-key");
    std::env::remove_var("REQUEST_TIMEOUT_MS");
    let config = Config::from_env().unwrap();
    assert_eq!(config.api_key.expose(), "sk-test-key");
    assert_eq!(config.request_timeout_ms, 60_000);
    std::env::remove_var("LLM_API_KEY");
}

// ============================================================================
// Dataset Tests
// ============================================================================

#[test]
fn test_dataset_rows_become_root_states() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[{{"id": 3, "query": ["CO", "H2O"], "ads_preferences": [1.0, -1.0], "catalyst_label": "bimetallic catalysts"}}]"#
    )
    .unwrap();

    let rows = load_dataset(file.path()).unwrap();
    let state = make_state(&rows[0], "gpt-4", "gpt-4").unwrap();
    assert_eq!(state.ads_symbols, vec!["CO", "H2O"]);
    assert_eq!(state.ads_preferences, vec![1.0, -1.0]);
    assert!(state.prompt().unwrap().contains("bimetallic catalysts"));
}

// ============================================================================
// End-to-End Search
// ============================================================================

#[tokio::test]
async fn test_beam_step_against_mock_api() {
    let server = MockServer::start().await;
    // Reward queries carry the candidate list; everything else is generation.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("adsorption energ"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("final_answer: [-0.6, -0.4]")))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("final_answer: [Pt, PdAu]")))
        .with_priority(2)
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let config = SearchConfig {
        num_generate: 2,
        num_keep: 1,
        depth: 2,
        ..SearchConfig::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let path = checkpoint_path(dir.path(), 0);
    let mut tree = restore_or_create(
        &config,
        make_state(
            &serde_json::from_value(json!({"query": ["CO"]})).unwrap(),
            "gpt-4",
            "gpt-4",
        )
        .unwrap(),
        build_policy(&config, &client),
        build_reward(&config, &client, "gpt-4").unwrap(),
        &path,
    )
    .await
    .unwrap();

    let outcome = run_search(tree.as_mut(), config.depth, &path).await;
    assert_eq!(outcome, SearchOutcome::Completed { steps: 1 });

    let document = read_document(&path).await.unwrap().unwrap();
    let kept = &document["nodes"][1][0];
    assert_eq!(kept["answer"], "final_answer: [Pt, PdAu]");
    assert!((document["node_rewards"][1][0].as_f64().unwrap() - 0.5).abs() < 1e-9);
    assert_eq!(document["generated_nodes"][1].as_array().unwrap().len(), 1);
    // Two generations plus one reward query per successor.
    assert_eq!(client.queries(), 4);
}
