//! Monte Carlo tree workflow integration tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use pretty_assertions::assert_eq;

use catalyst_search::search::{read_document, MctsSnapshot, MonteCarloTree, SearchTree};
use catalyst_search::state::ReasonerState;

use super::common::{root_state, DeadEndPolicy, FailingReward, FixedPolicy, TableReward};

#[tokio::test]
async fn test_simulations_grow_tree_and_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("search_tree_0.json");
    let mut tree = MonteCarloTree::new(
        root_state(&["CO"]),
        FixedPolicy::new(vec![0.7, 0.3]),
        TableReward::new(vec![1.0, 0.5]),
        2,
    )
    .with_exploration_constant(1.5)
    .with_discount_factor(0.9);

    for _ in 0..3 {
        tree.step_save(&path).await.unwrap();
    }
    assert_eq!(tree.node_count(), 7);
    assert_eq!(tree.progress(), 6);
    assert!(tree.len() >= 2);

    let document = read_document(&path).await.unwrap().unwrap();
    for key in [
        "nodes",
        "node_rewards",
        "parent_idx",
        "visits",
        "value_sums",
        "priors",
        "exploration_constant",
        "discount_factor",
        "num_generate",
        "start_time",
        "end_time",
    ] {
        assert!(document.get(key).is_some(), "missing {key}");
    }
    assert_eq!(document["visits"][0], 6);
    assert_eq!(document["discount_factor"], 0.9);

    let snapshot: MctsSnapshot = serde_json::from_value(document.clone()).unwrap();
    assert!(snapshot.validate().is_ok());

    let restored = MonteCarloTree::from_document(
        document,
        FixedPolicy::new(vec![0.7, 0.3]),
        TableReward::new(vec![1.0, 0.5]),
        ReasonerState::from_dict,
    )
    .unwrap();
    assert_eq!(restored.node_count(), 7);
    assert_eq!(restored.progress(), 6);
    let restored_sums = restored.snapshot().unwrap().value_sums;
    let sums = tree.snapshot().unwrap().value_sums;
    assert_eq!(restored_sums.len(), sums.len());
    for (a, b) in restored_sums.iter().zip(&sums) {
        assert!((a - b).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_dead_end_root_exhausts_tree() {
    let mut tree = MonteCarloTree::new(root_state(&["CO"]), DeadEndPolicy, TableReward::new(vec![]), 3);
    tree.step().await.unwrap();
    assert!(tree.is_exhausted());
    assert_eq!(tree.node_count(), 1);
}

#[tokio::test]
async fn test_reward_failure_propagates() {
    let mut tree = MonteCarloTree::new(root_state(&["CO"]), FixedPolicy::new(vec![1.0]), FailingReward, 3);
    assert!(tree.step().await.is_err());
    assert_eq!(tree.node_count(), 1);
}
