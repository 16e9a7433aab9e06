//! Error recovery integration tests.
//!
//! Verifies that a failing item halts alone, that bad checkpoints are
//! rejected before any step runs, and that invalid configuration fails fast.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::float_cmp
)]

use pretty_assertions::assert_eq;

use catalyst_search::config::{validate_search_config, SearchConfig, SearchMethod};
use catalyst_search::driver::{checkpoint_path, restore_or_create, run_search, DynReward, SearchOutcome};
use catalyst_search::error::{CheckpointError, ConfigError};

use super::common::{root_state, FailingReward, FixedPolicy, TableReward};

fn config() -> SearchConfig {
    SearchConfig {
        num_generate: 2,
        num_keep: 2,
        depth: 3,
        ..SearchConfig::default()
    }
}

// ============================================================================
// Batch Recovery
// ============================================================================

#[tokio::test]
async fn test_failing_item_does_not_stop_batch() {
    let dir = tempfile::tempdir().unwrap();
    let config = config();
    let mut outcomes = Vec::new();

    for index in 0..3 {
        let path = checkpoint_path(dir.path(), index);
        let reward: DynReward = if index == 1 {
            Box::new(FailingReward)
        } else {
            Box::new(TableReward::new(vec![1.0, 2.0]))
        };
        let mut tree = restore_or_create(
            &config,
            root_state(&["CO"]),
            Box::new(FixedPolicy::new(vec![0.5, 0.5])),
            reward,
            &path,
        )
        .await
        .unwrap();
        outcomes.push(run_search(tree.as_mut(), config.depth, &path).await);
    }

    assert_eq!(outcomes[0], SearchOutcome::Completed { steps: 2 });
    assert!(matches!(outcomes[1], SearchOutcome::Halted { steps: 0, ref error } if error.contains("relaxation backend")));
    assert_eq!(outcomes[2], SearchOutcome::Completed { steps: 2 });
    assert!(checkpoint_path(dir.path(), 0).exists());
    assert!(!checkpoint_path(dir.path(), 1).exists());
    assert!(checkpoint_path(dir.path(), 2).exists());
}

// ============================================================================
// Checkpoint Rejection
// ============================================================================

#[tokio::test]
async fn test_corrupt_checkpoint_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = checkpoint_path(dir.path(), 0);
    std::fs::write(&path, "{ not json").unwrap();

    let result = restore_or_create(
        &config(),
        root_state(&["CO"]),
        Box::new(FixedPolicy::new(vec![1.0])),
        Box::new(TableReward::new(vec![1.0])),
        &path,
    )
    .await;
    assert!(matches!(result, Err(CheckpointError::Deserialize { .. })));
}

#[tokio::test]
async fn test_inconsistent_checkpoint_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = checkpoint_path(dir.path(), 0);
    let document = serde_json::json!({
        "nodes": [[root_state(&["CO"]).to_dict().unwrap()], []],
        "node_rewards": [[0.0], [1.0]],
        "parent_idx": [[-1], []],
        "generated_nodes": [[]],
        "generated_node_rewards": [[]],
        "generated_parent_idx": [[]],
        "num_generate": 2,
        "num_keep": 2
    });
    std::fs::write(&path, document.to_string()).unwrap();

    let result = restore_or_create(
        &config(),
        root_state(&["CO"]),
        Box::new(FixedPolicy::new(vec![1.0])),
        Box::new(TableReward::new(vec![1.0])),
        &path,
    )
    .await;
    assert!(matches!(result, Err(CheckpointError::Corrupt { .. })));
}

#[tokio::test]
async fn test_beam_checkpoint_is_not_an_mcts_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = checkpoint_path(dir.path(), 0);
    let mut tree = restore_or_create(
        &config(),
        root_state(&["CO"]),
        Box::new(FixedPolicy::new(vec![1.0])),
        Box::new(TableReward::new(vec![1.0])),
        &path,
    )
    .await
    .unwrap();
    run_search(tree.as_mut(), 2, &path).await;

    let mcts = SearchConfig {
        method: SearchMethod::Mcts,
        ..config()
    };
    let result = restore_or_create(
        &mcts,
        root_state(&["CO"]),
        Box::new(FixedPolicy::new(vec![1.0])),
        Box::new(TableReward::new(vec![1.0])),
        &path,
    )
    .await;
    assert!(result.is_err());
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_invalid_search_configuration_fails_fast() {
    let config = SearchConfig {
        penalty_value: 1.0,
        ..SearchConfig::default()
    };
    assert!(matches!(
        validate_search_config(&config),
        Err(ConfigError::InvalidValue { ref var, .. }) if var == "penalty-value"
    ));
    assert!("simulated-annealing".parse::<SearchMethod>().is_err());
    assert!(validate_search_config(&SearchConfig::default()).is_ok());
}
