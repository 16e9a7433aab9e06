//! Beam search workflow integration tests.
//!
//! Tests expansion, selection, dead ends and persistence through the public
//! `SearchTree` surface.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::float_cmp
)]

use std::collections::HashSet;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::Value;

use catalyst_search::config::RewardPolarity;
use catalyst_search::search::{read_document, BeamSearchTree, SearchTree};
use catalyst_search::state::ReasonerState;

use super::common::{last_property, root_state, DeadEndPolicy, FixedPolicy, TableReward};

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_single_step_keeps_two_best() {
    let mut tree = BeamSearchTree::new(
        root_state(&["CO"]),
        FixedPolicy::new(vec![0.1, 0.4, 0.2, 0.3]),
        TableReward::new(vec![1.0, 5.0, 3.0, 2.0]),
        4,
        2,
    );
    tree.step().await.unwrap();

    assert_eq!(tree.len(), 2);
    assert_eq!(tree.node_rewards()[1], vec![5.0, 3.0]);
    assert_eq!(tree.parent_idx()[1], vec![0, 0]);
    let kept: Vec<usize> = tree.nodes()[1].iter().map(last_property).collect();
    assert_eq!(kept, vec![1, 2]);

    let mut discarded = tree.generated_node_rewards()[1].clone();
    discarded.sort_by(f64::total_cmp);
    assert_eq!(discarded, vec![1.0, 2.0]);
}

#[tokio::test]
async fn test_lower_is_better_polarity() {
    let mut tree = BeamSearchTree::new(
        root_state(&["CO"]),
        FixedPolicy::new(vec![0.1, 0.4, 0.2, 0.3]),
        TableReward::new(vec![1.0, 5.0, 3.0, 2.0]),
        4,
        2,
    )
    .with_polarity(RewardPolarity::LowerIsBetter);
    tree.step().await.unwrap();
    assert_eq!(tree.node_rewards()[1], vec![1.0, 2.0]);
}

#[tokio::test]
async fn test_dead_end_level_is_empty() {
    let mut tree = BeamSearchTree::new(root_state(&["CO"]), DeadEndPolicy, TableReward::new(vec![]), 4, 2);
    tree.step().await.unwrap();

    assert_eq!(tree.len(), 2);
    assert!(tree.nodes()[1].is_empty());
    assert!(tree.node_rewards()[1].is_empty());
    assert!(tree.parent_idx()[1].is_empty());
    assert!(tree.is_exhausted());
}

#[tokio::test]
async fn test_num_generate_limits_successors_per_node() {
    let reward = TableReward::new(vec![1.0; 6]);
    let mut tree = BeamSearchTree::new(
        root_state(&["CO"]),
        FixedPolicy::new(vec![1.0; 6]),
        reward,
        3,
        10,
    );
    tree.step().await.unwrap();
    assert_eq!(tree.nodes()[1].len(), 3);
    let distinct: HashSet<usize> = tree.nodes()[1].iter().map(last_property).collect();
    assert_eq!(distinct.len(), 3);
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_step_save_then_resume() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("search_tree_0.json");
    let mut tree = BeamSearchTree::new(
        root_state(&["CO", "H2O"]),
        FixedPolicy::new(vec![0.5, 0.3, 0.2]),
        TableReward::new(vec![2.0, 1.0, 3.0]),
        3,
        2,
    );
    tree.step_save(&path).await.unwrap();

    let document = read_document(&path).await.unwrap().unwrap();
    for key in [
        "nodes",
        "node_rewards",
        "parent_idx",
        "generated_nodes",
        "generated_node_rewards",
        "generated_parent_idx",
        "num_generate",
        "num_keep",
        "start_time",
        "end_time",
    ] {
        assert!(document.get(key).is_some(), "missing {key}");
    }

    let mut resumed = BeamSearchTree::from_document(
        document,
        FixedPolicy::new(vec![0.5, 0.3, 0.2]),
        TableReward::new(vec![2.0, 1.0, 3.0]),
        ReasonerState::from_dict,
    )
    .unwrap();
    assert_eq!(resumed.nodes(), tree.nodes());
    assert_eq!(resumed.node_rewards(), tree.node_rewards());
    assert_eq!(resumed.parent_idx(), tree.parent_idx());
    assert_eq!(resumed.num_generate(), 3);
    assert_eq!(resumed.num_keep(), 2);
    let (resumed_start, start) = (resumed.start_time().unwrap(), tree.start_time().unwrap());
    assert!((resumed_start - start).abs() < 1e-3);

    resumed.step_save(&path).await.unwrap();
    let document = read_document(&path).await.unwrap().unwrap();
    assert_eq!(document["nodes"].as_array().unwrap().len(), 3);
    assert_eq!(document["nodes"][2][0]["ads_symbols"], serde_json::json!(["CO", "H2O"]));
}

#[tokio::test]
async fn test_empty_checkpoint_file_reads_as_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("search_tree_0.json");
    std::fs::write(&path, "  \n").unwrap();
    assert_eq!(read_document(&path).await.unwrap(), None::<Value>);
    assert_eq!(read_document(&dir.path().join("absent.json")).await.unwrap(), None);
}

// ============================================================================
// Property Tests
// ============================================================================

fn run_steps(priors: Vec<f64>, rewards: Vec<f64>, num_generate: usize, num_keep: usize, steps: usize) -> Value {
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    runtime.block_on(async {
        let mut tree = BeamSearchTree::new(
            root_state(&["CO"]),
            FixedPolicy::new(priors),
            TableReward::new(rewards),
            num_generate,
            num_keep,
        );
        for _ in 0..steps {
            tree.step().await.unwrap();
        }
        tree.to_document().unwrap()
    })
}

fn as_f64s(value: &Value) -> Vec<f64> {
    value.as_array().unwrap().iter().map(|v| v.as_f64().unwrap()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_levels_are_consistent(
        table in proptest::collection::vec((0.0f64..1.0, -10.0f64..10.0), 1..8),
        num_generate in 1usize..6,
        num_keep in 1usize..5,
        steps in 1usize..4,
    ) {
        let (priors, rewards): (Vec<f64>, Vec<f64>) = table.into_iter().unzip();
        let document = run_steps(priors, rewards, num_generate, num_keep, steps);
        let nodes = document["nodes"].as_array().unwrap();
        let rewards = document["node_rewards"].as_array().unwrap();
        let parents = document["parent_idx"].as_array().unwrap();

        prop_assert_eq!(nodes.len(), steps + 1);
        for level in 0..nodes.len() {
            let width = nodes[level].as_array().unwrap().len();
            prop_assert_eq!(width, rewards[level].as_array().unwrap().len());
            prop_assert_eq!(width, parents[level].as_array().unwrap().len());
            if level > 0 {
                prop_assert!(width <= num_keep);
                let previous = nodes[level - 1].as_array().unwrap().len();
                for parent in parents[level].as_array().unwrap() {
                    let parent = parent.as_i64().unwrap();
                    prop_assert!(parent >= 0 && (parent as usize) < previous);
                }
            }
        }
    }

    #[test]
    fn prop_kept_and_generated_partition_pool(
        rewards in proptest::collection::vec(-10.0f64..10.0, 1..8),
        num_keep in 1usize..6,
    ) {
        let count = rewards.len();
        let document = run_steps(vec![1.0; count], rewards.clone(), count, num_keep, 1);
        let kept = as_f64s(&document["node_rewards"][1]);
        let generated = as_f64s(&document["generated_node_rewards"][1]);

        prop_assert_eq!(kept.len() + generated.len(), count);
        prop_assert_eq!(kept.len(), count.min(num_keep));

        let mut pooled: Vec<f64> = kept.iter().chain(&generated).copied().collect();
        let mut expected = rewards;
        pooled.sort_by(f64::total_cmp);
        expected.sort_by(f64::total_cmp);
        prop_assert_eq!(pooled, expected);

        let worst_kept = kept.iter().copied().fold(f64::INFINITY, f64::min);
        prop_assert!(generated.iter().all(|&g| g <= worst_kept));
    }
}
