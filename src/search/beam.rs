//! Beam search.
//!
//! Level 0 holds the root state with reward 0 and parent -1. A step expands
//! every node of the last level: its actions are shuffled, ranked by prior,
//! and the top `num_generate` with positive prior are applied and scored. All
//! successors of the level are pooled; the best `num_keep` by reward become
//! the next level and the rest are recorded as generated but discarded.
//!
//! # Example
//!
//! ```ignore
//! let mut tree = BeamSearchTree::new(root, policy, reward, 8, 6);
//! while tree.len() < depth {
//!     tree.step_save(&path).await?;
//! }
//! ```

use std::cmp::Ordering;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde_json::{json, Map, Value};

use super::checkpoint::{ensure_matches, from_document, to_document, BeamSnapshot};
use super::policy::{Action, ActionSet, Policy};
use super::reward::RewardFunction;
use super::SearchTree;
use crate::config::RewardPolarity;
use crate::error::{CheckpointError, SearchError, StateError};
use crate::state::ReasonerState;
use crate::traits::{epoch_seconds, RealTimeProvider, TimeProvider};

/// Info field recording the action that produced a state.
pub const ACTION_FIELD: &str = "action";

/// Beam search tree.
pub struct BeamSearchTree<P, R, T = RealTimeProvider>
where
    P: Policy,
    R: RewardFunction,
    T: TimeProvider,
{
    policy: P,
    reward_fn: R,
    time: T,
    num_generate: usize,
    num_keep: usize,
    polarity: RewardPolarity,
    nodes: Vec<Vec<ReasonerState>>,
    node_rewards: Vec<Vec<f64>>,
    parent_idx: Vec<Vec<i64>>,
    generated_nodes: Vec<Vec<ReasonerState>>,
    generated_node_rewards: Vec<Vec<f64>>,
    generated_parent_idx: Vec<Vec<i64>>,
    start_time: Option<f64>,
    end_time: Option<f64>,
    extra: Map<String, Value>,
}

impl<P, R> BeamSearchTree<P, R, RealTimeProvider>
where
    P: Policy,
    R: RewardFunction,
{
    /// Seed a tree with `root`.
    #[must_use]
    pub fn new(root: ReasonerState, policy: P, reward_fn: R, num_generate: usize, num_keep: usize) -> Self {
        Self {
            policy,
            reward_fn,
            time: RealTimeProvider,
            num_generate,
            num_keep,
            polarity: RewardPolarity::default(),
            nodes: vec![vec![root]],
            node_rewards: vec![vec![0.0]],
            parent_idx: vec![vec![-1]],
            generated_nodes: vec![Vec::new()],
            generated_node_rewards: vec![Vec::new()],
            generated_parent_idx: vec![Vec::new()],
            start_time: None,
            end_time: None,
            extra: Map::new(),
        }
    }

    /// Rebuild a tree from a snapshot.
    ///
    /// States are rebuilt with `node_constructor`, normally
    /// [`ReasonerState::from_dict`].
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Corrupt`] if the snapshot violates the tree
    /// invariants and [`CheckpointError::Deserialize`] if a state cannot be
    /// rebuilt.
    pub fn from_snapshot<F>(
        snapshot: BeamSnapshot,
        policy: P,
        reward_fn: R,
        node_constructor: F,
    ) -> Result<Self, CheckpointError>
    where
        F: Fn(&Value) -> Result<ReasonerState, StateError>,
    {
        snapshot.validate()?;
        let rebuild = |levels: Vec<Vec<Value>>| -> Result<Vec<Vec<ReasonerState>>, CheckpointError> {
            levels
                .iter()
                .map(|level| {
                    level
                        .iter()
                        .map(|node| {
                            node_constructor(node).map_err(|e| CheckpointError::Deserialize {
                                message: e.to_string(),
                            })
                        })
                        .collect()
                })
                .collect()
        };

        Ok(Self {
            policy,
            reward_fn,
            time: RealTimeProvider,
            num_generate: snapshot.num_generate,
            num_keep: snapshot.num_keep,
            polarity: snapshot.polarity,
            nodes: rebuild(snapshot.nodes)?,
            node_rewards: snapshot.node_rewards,
            parent_idx: snapshot.parent_idx,
            generated_nodes: rebuild(snapshot.generated_nodes)?,
            generated_node_rewards: snapshot.generated_node_rewards,
            generated_parent_idx: snapshot.generated_parent_idx,
            start_time: snapshot.start_time,
            end_time: snapshot.end_time,
            extra: snapshot.extra,
        })
    }

    /// Rebuild a tree from a persisted document.
    ///
    /// # Errors
    ///
    /// See [`BeamSearchTree::from_snapshot`].
    pub fn from_document<F>(
        document: Value,
        policy: P,
        reward_fn: R,
        node_constructor: F,
    ) -> Result<Self, CheckpointError>
    where
        F: Fn(&Value) -> Result<ReasonerState, StateError>,
    {
        Self::from_snapshot(from_document(document)?, policy, reward_fn, node_constructor)
    }
}

impl<P, R, T> BeamSearchTree<P, R, T>
where
    P: Policy,
    R: RewardFunction,
    T: TimeProvider,
{
    /// Use another clock.
    #[must_use]
    pub fn with_time_provider<U: TimeProvider>(self, time: U) -> BeamSearchTree<P, R, U> {
        BeamSearchTree {
            policy: self.policy,
            reward_fn: self.reward_fn,
            time,
            num_generate: self.num_generate,
            num_keep: self.num_keep,
            polarity: self.polarity,
            nodes: self.nodes,
            node_rewards: self.node_rewards,
            parent_idx: self.parent_idx,
            generated_nodes: self.generated_nodes,
            generated_node_rewards: self.generated_node_rewards,
            generated_parent_idx: self.generated_parent_idx,
            start_time: self.start_time,
            end_time: self.end_time,
            extra: self.extra,
        }
    }

    /// Set which direction of reward is better.
    #[must_use]
    pub const fn with_polarity(mut self, polarity: RewardPolarity) -> Self {
        self.polarity = polarity;
        self
    }

    /// Retained states per level.
    #[must_use]
    pub fn nodes(&self) -> &[Vec<ReasonerState>] {
        &self.nodes
    }

    /// Rewards of the retained states.
    #[must_use]
    pub fn node_rewards(&self) -> &[Vec<f64>] {
        &self.node_rewards
    }

    /// Parent indices of the retained states.
    #[must_use]
    pub fn parent_idx(&self) -> &[Vec<i64>] {
        &self.parent_idx
    }

    /// Discarded states per level, aligned with [`Self::nodes`].
    #[must_use]
    pub fn generated_nodes(&self) -> &[Vec<ReasonerState>] {
        &self.generated_nodes
    }

    /// Rewards of the discarded states.
    #[must_use]
    pub fn generated_node_rewards(&self) -> &[Vec<f64>] {
        &self.generated_node_rewards
    }

    /// Parent indices of the discarded states.
    #[must_use]
    pub fn generated_parent_idx(&self) -> &[Vec<i64>] {
        &self.generated_parent_idx
    }

    /// Actions expanded per node.
    #[must_use]
    pub const fn num_generate(&self) -> usize {
        self.num_generate
    }

    /// States retained per level.
    #[must_use]
    pub const fn num_keep(&self) -> usize {
        self.num_keep
    }

    /// Which end of the reward scale is kept.
    #[must_use]
    pub const fn polarity(&self) -> RewardPolarity {
        self.polarity
    }

    /// Epoch seconds of the first step.
    #[must_use]
    pub const fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    /// Epoch seconds of the last save.
    #[must_use]
    pub const fn end_time(&self) -> Option<f64> {
        self.end_time
    }

    /// Best retained state over all levels below the root.
    #[must_use]
    pub fn best(&self) -> Option<(&ReasonerState, f64)> {
        let polarity = self.polarity;
        self.nodes
            .iter()
            .zip(&self.node_rewards)
            .skip(1)
            .flat_map(|(level, rewards)| level.iter().zip(rewards.iter().copied()))
            .reduce(|best, candidate| {
                if polarity.prefers(candidate.1, best.1) {
                    candidate
                } else {
                    best
                }
            })
    }

    /// Fail unless the tree was built with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::ConfigMismatch`] on the first difference.
    pub fn validate_config(
        &self,
        num_keep: usize,
        num_generate: usize,
        polarity: RewardPolarity,
    ) -> Result<(), CheckpointError> {
        ensure_matches("num_keep", num_keep, self.num_keep)?;
        ensure_matches("num_generate", num_generate, self.num_generate)?;
        ensure_matches("polarity", polarity, self.polarity)
    }

    /// Record the start time.
    pub fn start_timer(&mut self) {
        self.start_time = Some(epoch_seconds(self.time.now()));
    }

    fn stamp_end(&mut self) {
        self.end_time = Some(epoch_seconds(self.time.now()));
    }

    /// Snapshot of the whole tree.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Serialize`] if a state cannot be converted.
    pub fn snapshot(&self) -> Result<BeamSnapshot, CheckpointError> {
        let convert = |levels: &[Vec<ReasonerState>]| -> Result<Vec<Vec<Value>>, CheckpointError> {
            levels
                .iter()
                .map(|level| {
                    level
                        .iter()
                        .map(|state| {
                            state.to_dict().map_err(|e| CheckpointError::Serialize {
                                message: e.to_string(),
                            })
                        })
                        .collect()
                })
                .collect()
        };
        Ok(BeamSnapshot {
            nodes: convert(&self.nodes)?,
            node_rewards: self.node_rewards.clone(),
            parent_idx: self.parent_idx.clone(),
            generated_nodes: convert(&self.generated_nodes)?,
            generated_node_rewards: self.generated_node_rewards.clone(),
            generated_parent_idx: self.generated_parent_idx.clone(),
            num_generate: self.num_generate,
            num_keep: self.num_keep,
            polarity: self.polarity,
            start_time: self.start_time,
            end_time: self.end_time,
            extra: self.extra.clone(),
        })
    }

    /// Expand the last level and append the next one.
    ///
    /// A node without positive-prior actions contributes nothing, so a level
    /// may hold fewer than `num_keep` states, or none.
    ///
    /// # Errors
    ///
    /// Returns a [`SearchError`] if the policy or reward function fails. The
    /// tree is left unchanged in that case.
    #[allow(clippy::cast_possible_wrap)]
    pub async fn simulation_policy(&mut self) -> Result<(), SearchError> {
        if self.start_time.is_none() {
            self.start_timer();
        }

        let mut pooled = Vec::new();
        let mut rewards = Vec::new();
        let mut parents = Vec::new();
        if let Some(frontier) = self.nodes.last() {
            for (parent, node) in frontier.iter().enumerate() {
                let action_set = self.policy.get_actions(node).await?;
                let selected = select_actions(&action_set, self.num_generate);
                if selected.is_empty() {
                    tracing::debug!(parent, "Dead end, no actions with positive prior");
                }
                for (action, prior) in selected {
                    let mut child = self.policy.apply(&action, node, false).await?;
                    child.record_info(ACTION_FIELD, json!({ "action": action, "prior": prior }));
                    let reward = self.reward_fn.evaluate(&mut child).await?;
                    tracing::debug!(parent, action = %action, reward, "Scored successor");
                    pooled.push(child);
                    rewards.push(reward);
                    parents.push(parent as i64);
                }
            }
        }

        let (kept, generated) = partition_by_reward(&rewards, self.num_keep, self.polarity);
        let mut slots: Vec<Option<ReasonerState>> = pooled.into_iter().map(Some).collect();
        let mut take = |indices: &[usize]| -> (Vec<ReasonerState>, Vec<f64>, Vec<i64>) {
            let states = indices.iter().filter_map(|&i| slots[i].take()).collect();
            let level_rewards = indices.iter().map(|&i| rewards[i]).collect();
            let level_parents = indices.iter().map(|&i| parents[i]).collect();
            (states, level_rewards, level_parents)
        };
        let (kept_states, kept_rewards, kept_parents) = take(&kept);
        let (gen_states, gen_rewards, gen_parents) = take(&generated);

        tracing::info!(
            level = self.nodes.len(),
            kept = kept_states.len(),
            discarded = gen_states.len(),
            best = kept_rewards.first().copied(),
            "Beam step complete"
        );
        self.nodes.push(kept_states);
        self.node_rewards.push(kept_rewards);
        self.parent_idx.push(kept_parents);
        self.generated_nodes.push(gen_states);
        self.generated_node_rewards.push(gen_rewards);
        self.generated_parent_idx.push(gen_parents);
        Ok(())
    }
}

/// Shuffle, rank by prior and keep the top `num_generate` positive priors.
///
/// The shuffle randomizes which of several equal-prior actions wins.
fn select_actions(set: &ActionSet, num_generate: usize) -> Vec<(Action, f64)> {
    let mut order: Vec<usize> = (0..set.len()).collect();
    order.shuffle(&mut rand::thread_rng());
    order.sort_by(|&a, &b| set.priors[b].total_cmp(&set.priors[a]));
    order
        .into_iter()
        .take(num_generate)
        .filter(|&i| set.priors[i] > 0.0)
        .map(|i| (set.actions[i].clone(), set.priors[i]))
        .collect()
}

/// Split pooled indices into the best `num_keep`, best first, and the rest in
/// pooled order. Equal rewards favour the lower index.
fn partition_by_reward(
    rewards: &[f64],
    num_keep: usize,
    polarity: RewardPolarity,
) -> (Vec<usize>, Vec<usize>) {
    let mut order: Vec<usize> = (0..rewards.len()).collect();
    order.sort_by(|&a, &b| best_first(polarity, rewards[a], rewards[b]).then(a.cmp(&b)));
    let keep = num_keep.min(order.len());
    let mut rest = order.split_off(keep);
    rest.sort_unstable();
    (order, rest)
}

fn best_first(polarity: RewardPolarity, a: f64, b: f64) -> Ordering {
    match polarity {
        RewardPolarity::HigherIsBetter => b.total_cmp(&a),
        RewardPolarity::LowerIsBetter => a.total_cmp(&b),
    }
}

#[async_trait]
impl<P, R, T> SearchTree for BeamSearchTree<P, R, T>
where
    P: Policy,
    R: RewardFunction,
    T: TimeProvider,
{
    async fn step(&mut self) -> Result<(), SearchError> {
        self.simulation_policy().await
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn is_exhausted(&self) -> bool {
        self.nodes.last().map_or(true, Vec::is_empty)
    }

    fn end_timer(&mut self) {
        self.stamp_end();
    }

    fn set_extra(&mut self, key: &str, value: Value) {
        self.extra.insert(key.to_string(), value);
    }

    fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    fn to_document(&self) -> Result<Value, CheckpointError> {
        to_document(&self.snapshot()?)
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
    use crate::error::{PolicyError, RewardError};
    use crate::search::policy::MockPolicy;
    use crate::search::reward::MockRewardFunction;
    use crate::test_utils::{fixed_time, policy_with, property, reward_by_property, root_state as root};
    use pretty_assertions::assert_eq;

    // ========================================================================
    // Selection helpers
    // ========================================================================

    #[test]
    fn test_select_actions_takes_top_priors() {
        let set = ActionSet::new((0..4).map(property).collect(), vec![0.1, 0.4, 0.2, 0.3]).unwrap();
        let selected = select_actions(&set, 2);
        assert_eq!(selected, vec![(property(1), 0.4), (property(3), 0.3)]);
    }

    #[test]
    fn test_select_actions_skips_non_positive_after_ranking() {
        let set = ActionSet::new((0..3).map(property).collect(), vec![0.0, 0.5, 0.0]).unwrap();
        assert_eq!(select_actions(&set, 3), vec![(property(1), 0.5)]);
        assert!(select_actions(&ActionSet::default(), 3).is_empty());
    }

    #[test]
    fn test_select_actions_ties_keep_count() {
        let set = ActionSet::new((0..5).map(property).collect(), vec![0.2; 5]).unwrap();
        for _ in 0..20 {
            let selected = select_actions(&set, 3);
            assert_eq!(selected.len(), 3);
            assert!(selected.iter().all(|(_, p)| *p == 0.2));
        }
    }

    #[test]
    fn test_partition_by_reward() {
        let (kept, rest) = partition_by_reward(&[1.0, 5.0, 3.0, 2.0], 2, RewardPolarity::HigherIsBetter);
        assert_eq!(kept, vec![1, 2]);
        assert_eq!(rest, vec![0, 3]);

        let (kept, rest) = partition_by_reward(&[1.0, 5.0, 3.0, 2.0], 2, RewardPolarity::LowerIsBetter);
        assert_eq!(kept, vec![0, 3]);
        assert_eq!(rest, vec![1, 2]);
    }

    #[test]
    fn test_partition_ties_favour_lower_index() {
        let (kept, rest) = partition_by_reward(&[2.0, 2.0, 2.0], 2, RewardPolarity::HigherIsBetter);
        assert_eq!(kept, vec![0, 1]);
        assert_eq!(rest, vec![2]);
        let (kept, rest) = partition_by_reward(&[1.0], 4, RewardPolarity::HigherIsBetter);
        assert_eq!((kept, rest), (vec![0], vec![]));
    }

    // ========================================================================
    // Steps
    // ========================================================================

    #[tokio::test]
    async fn test_step_keeps_best_successors() {
        let mut tree = BeamSearchTree::new(
            root(),
            policy_with(vec![0.1, 0.4, 0.2, 0.3]),
            reward_by_property(vec![1.0, 5.0, 3.0, 2.0]),
            4,
            2,
        );
        tree.step().await.unwrap();

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.node_rewards()[1], vec![5.0, 3.0]);
        assert_eq!(tree.parent_idx()[1], vec![0, 0]);
        assert_eq!(tree.generated_nodes().len(), tree.len());
        assert!(tree.generated_nodes()[0].is_empty());
        assert_eq!(tree.generated_node_rewards()[1], vec![2.0, 1.0]);
        assert_eq!(tree.generated_parent_idx()[1], vec![0, 0]);
        assert_eq!(tree.nodes()[1][0].include_list, vec!["property 1"]);
        assert_eq!(tree.nodes()[1][0].info[ACTION_FIELD][0]["prior"], 0.4);
        assert!(tree.start_time().is_some());
        let (best, reward) = tree.best().unwrap();
        assert_eq!(reward, 5.0);
        assert_eq!(best.include_list, vec!["property 1"]);
    }

    #[tokio::test]
    async fn test_dead_end_yields_empty_level() {
        let mut policy = MockPolicy::new();
        policy
            .expect_get_actions()
            .returning(|_| Ok(ActionSet::default()));
        let mut tree = BeamSearchTree::new(root(), policy, MockRewardFunction::new(), 4, 2);

        tree.step().await.unwrap();
        assert_eq!(tree.len(), 2);
        assert!(tree.nodes()[1].is_empty());
        assert_eq!(tree.generated_nodes().len(), 2);
        assert!(tree.generated_nodes()[1].is_empty());
        assert!(tree.is_exhausted());

        // Further steps keep appending empty levels without failing.
        tree.step().await.unwrap();
        assert_eq!(tree.len(), 3);
    }

    #[tokio::test]
    async fn test_second_level_expands_every_node() {
        let mut tree = BeamSearchTree::new(
            root(),
            policy_with(vec![0.5, 0.5]),
            reward_by_property(vec![1.0, 2.0]),
            2,
            3,
        );
        tree.step().await.unwrap();
        tree.step().await.unwrap();

        // Two nodes times two actions pooled; three kept.
        assert_eq!(tree.nodes()[2].len(), 3);
        assert_eq!(tree.generated_nodes()[2].len(), 1);
        assert!((0..2).contains(&tree.generated_parent_idx()[2][0]));
        for &parent in &tree.parent_idx()[2] {
            assert!((0..2).contains(&parent));
        }
    }

    #[tokio::test]
    async fn test_failure_leaves_tree_unchanged() {
        let mut policy = MockPolicy::new();
        policy.expect_get_actions().returning(|_| {
            Err(PolicyError::Similarity {
                message: "embedding service down".into(),
            })
        });
        let mut tree = BeamSearchTree::new(root(), policy, MockRewardFunction::new(), 4, 2);
        let err = tree.step().await.unwrap_err();
        assert!(matches!(err, SearchError::Policy(_)));
        assert_eq!(tree.len(), 1);

        let mut reward = MockRewardFunction::new();
        reward.expect_evaluate().returning(|_| {
            Err(RewardError::MalformedInput {
                reason: "bad".into(),
            })
        });
        let mut tree = BeamSearchTree::new(root(), policy_with(vec![1.0]), reward, 4, 2);
        assert!(matches!(
            tree.step().await.unwrap_err(),
            SearchError::Reward(_)
        ));
        assert_eq!(tree.len(), 1);
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    #[tokio::test]
    async fn test_step_save_writes_document() {
        let clock = fixed_time(1_700_000_000);
        let mut tree = BeamSearchTree::new(
            root(),
            policy_with(vec![0.1, 0.4, 0.2, 0.3]),
            reward_by_property(vec![1.0, 5.0, 3.0, 2.0]),
            4,
            2,
        )
        .with_time_provider(clock);
        tree.set_extra("total_time", json!(1.5));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search_tree_0.json");
        tree.step_save(&path).await.unwrap();

        let document: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(document["node_rewards"][1], json!([5.0, 3.0]));
        assert_eq!(document["num_keep"], 2);
        assert_eq!(document["start_time"], 1_700_000_000.0);
        assert_eq!(document["end_time"], 1_700_000_000.0);
        assert_eq!(document["total_time"], 1.5);
        assert_eq!(document["nodes"][1][0]["include_list"], json!(["property 1"]));
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_and_config_check() {
        let mut tree = BeamSearchTree::new(
            root(),
            policy_with(vec![0.1, 0.4, 0.2, 0.3]),
            reward_by_property(vec![1.0, 5.0, 3.0, 2.0]),
            4,
            2,
        );
        tree.step().await.unwrap();
        let document = SearchTree::to_document(&tree).unwrap();

        let restored = BeamSearchTree::from_document(
            document,
            policy_with(vec![1.0]),
            MockRewardFunction::new(),
            ReasonerState::from_dict,
        )
        .unwrap();
        assert_eq!(restored.nodes(), tree.nodes());
        assert_eq!(restored.node_rewards(), tree.node_rewards());
        assert_eq!(restored.parent_idx(), tree.parent_idx());
        assert_eq!(restored.num_generate(), 4);
        assert_eq!(restored.num_keep(), 2);
        assert_eq!(restored.generated_nodes(), tree.generated_nodes());
        assert!(restored.validate_config(2, 4, RewardPolarity::HigherIsBetter).is_ok());
        assert!(matches!(
            restored.validate_config(3, 4, RewardPolarity::HigherIsBetter),
            Err(CheckpointError::ConfigMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_polarity_survives_checkpoint() {
        let mut tree = BeamSearchTree::new(
            root(),
            policy_with(vec![0.1, 0.4, 0.2, 0.3]),
            reward_by_property(vec![1.0, 5.0, 3.0, 2.0]),
            4,
            2,
        )
        .with_polarity(RewardPolarity::LowerIsBetter);
        tree.step().await.unwrap();
        let document = SearchTree::to_document(&tree).unwrap();
        assert_eq!(document["polarity"], "lower-is-better");

        let restored = BeamSearchTree::from_document(
            document,
            policy_with(vec![1.0]),
            MockRewardFunction::new(),
            ReasonerState::from_dict,
        )
        .unwrap();
        assert_eq!(restored.polarity(), RewardPolarity::LowerIsBetter);
        assert!(restored.validate_config(2, 4, RewardPolarity::LowerIsBetter).is_ok());
        assert_eq!(
            restored
                .validate_config(2, 4, RewardPolarity::HigherIsBetter)
                .unwrap_err(),
            CheckpointError::ConfigMismatch {
                field: "polarity".into(),
                expected: "higher-is-better".into(),
                found: "lower-is-better".into(),
            }
        );
    }

    #[test]
    fn test_from_snapshot_rejects_bad_state() {
        let snapshot: BeamSnapshot = from_document(json!({
            "nodes": [[{"answer": "no adsorbates"}]],
            "node_rewards": [[0.0]],
            "parent_idx": [[-1]],
            "generated_nodes": [[]],
            "generated_node_rewards": [[]],
            "generated_parent_idx": [[]],
            "num_generate": 2,
            "num_keep": 2
        }))
        .unwrap();
        let result = BeamSearchTree::from_snapshot(
            snapshot,
            MockPolicy::new(),
            MockRewardFunction::new(),
            ReasonerState::from_dict,
        );
        assert!(matches!(result, Err(CheckpointError::Deserialize { .. })));
    }
}
