//! Monte Carlo tree search.
//!
//! Nodes live in an arena indexed by creation order, so a parent always has
//! a lower index than its children. One step:
//!
//! 1. descend from the root to a leaf, picking at each node the child with
//!    the highest `Q + c * prior * sqrt(N_parent) / (1 + N_child)`, skipping
//!    exhausted subtrees (unvisited children are taken first);
//! 2. expand the leaf with the top `num_generate` actions and score every
//!    new child;
//! 3. back each child's reward up to the root, discounted once per level.
//!
//! A leaf without actions is marked terminal and backs up zero.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::beam::ACTION_FIELD;
use super::checkpoint::{ensure_matches, from_document, to_document, MctsSnapshot};
use super::policy::Policy;
use super::reward::RewardFunction;
use super::SearchTree;
use crate::error::{CheckpointError, SearchError, StateError};
use crate::state::ReasonerState;
use crate::traits::{epoch_seconds, RealTimeProvider, TimeProvider};

/// Default exploration constant.
pub const DEFAULT_EXPLORATION_CONSTANT: f64 = 1.0;

/// Default discount factor.
pub const DEFAULT_DISCOUNT_FACTOR: f64 = 1.0;

#[derive(Debug, Clone)]
struct Node {
    state: ReasonerState,
    parent: Option<usize>,
    children: Vec<usize>,
    visits: u64,
    value_sum: f64,
    prior: f64,
    reward: f64,
    terminal: bool,
    /// Terminal, or every child is exhausted.
    exhausted: bool,
}

impl Node {
    fn new(state: ReasonerState, parent: Option<usize>, prior: f64, reward: f64) -> Self {
        Self {
            state,
            parent,
            children: Vec::new(),
            visits: 0,
            value_sum: 0.0,
            prior,
            reward,
            terminal: false,
            exhausted: false,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn mean_value(&self) -> f64 {
        if self.visits == 0 {
            0.0
        } else {
            self.value_sum / self.visits as f64
        }
    }
}

/// Monte Carlo search tree.
pub struct MonteCarloTree<P, R, T = RealTimeProvider>
where
    P: Policy,
    R: RewardFunction,
    T: TimeProvider,
{
    policy: P,
    reward_fn: R,
    time: T,
    num_generate: usize,
    exploration_constant: f64,
    discount_factor: f64,
    nodes: Vec<Node>,
    start_time: Option<f64>,
    end_time: Option<f64>,
    extra: Map<String, Value>,
}

impl<P, R> MonteCarloTree<P, R, RealTimeProvider>
where
    P: Policy,
    R: RewardFunction,
{
    /// Seed a tree with `root`.
    #[must_use]
    pub fn new(root: ReasonerState, policy: P, reward_fn: R, num_generate: usize) -> Self {
        Self {
            policy,
            reward_fn,
            time: RealTimeProvider,
            num_generate,
            exploration_constant: DEFAULT_EXPLORATION_CONSTANT,
            discount_factor: DEFAULT_DISCOUNT_FACTOR,
            nodes: vec![Node::new(root, None, 1.0, 0.0)],
            start_time: None,
            end_time: None,
            extra: Map::new(),
        }
    }

    /// Rebuild a tree from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Corrupt`] for an inconsistent snapshot and
    /// [`CheckpointError::Deserialize`] if a state cannot be rebuilt.
    pub fn from_snapshot<F>(
        snapshot: MctsSnapshot,
        policy: P,
        reward_fn: R,
        node_constructor: F,
    ) -> Result<Self, CheckpointError>
    where
        F: Fn(&Value) -> Result<ReasonerState, StateError>,
    {
        snapshot.validate()?;
        let mut nodes: Vec<Node> = Vec::with_capacity(snapshot.nodes.len());
        for (i, value) in snapshot.nodes.iter().enumerate() {
            let state = node_constructor(value).map_err(|e| CheckpointError::Deserialize {
                message: format!("node {i}: {e}"),
            })?;
            let parent = usize::try_from(snapshot.parent_idx[i]).ok();
            let mut node = Node::new(state, parent, snapshot.priors[i], snapshot.node_rewards[i]);
            node.visits = snapshot.visits[i];
            node.value_sum = snapshot.value_sums[i];
            node.terminal = snapshot.terminal.get(i).copied().unwrap_or(false);
            if let Some(parent) = parent {
                nodes[parent].children.push(i);
            }
            nodes.push(node);
        }
        // Children always follow their parent.
        for i in (0..nodes.len()).rev() {
            let node = &nodes[i];
            let exhausted = node.terminal
                || (!node.children.is_empty() && node.children.iter().all(|&c| nodes[c].exhausted));
            nodes[i].exhausted = exhausted;
        }

        Ok(Self {
            policy,
            reward_fn,
            time: RealTimeProvider,
            num_generate: snapshot.num_generate,
            exploration_constant: snapshot.exploration_constant,
            discount_factor: snapshot.discount_factor,
            nodes,
            start_time: snapshot.start_time,
            end_time: snapshot.end_time,
            extra: snapshot.extra,
        })
    }

    /// Rebuild a tree from a persisted document.
    ///
    /// # Errors
    ///
    /// See [`MonteCarloTree::from_snapshot`].
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

impl<P, R, T> MonteCarloTree<P, R, T>
where
    P: Policy,
    R: RewardFunction,
    T: TimeProvider,
{
    /// Use another clock.
    #[must_use]
    pub fn with_time_provider<U: TimeProvider>(self, time: U) -> MonteCarloTree<P, R, U> {
        MonteCarloTree {
            policy: self.policy,
            reward_fn: self.reward_fn,
            time,
            num_generate: self.num_generate,
            exploration_constant: self.exploration_constant,
            discount_factor: self.discount_factor,
            nodes: self.nodes,
            start_time: self.start_time,
            end_time: self.end_time,
            extra: self.extra,
        }
    }

    /// Set the exploration constant.
    #[must_use]
    pub const fn with_exploration_constant(mut self, c: f64) -> Self {
        self.exploration_constant = c;
        self
    }

    /// Set the per-level discount.
    #[must_use]
    pub const fn with_discount_factor(mut self, discount: f64) -> Self {
        self.discount_factor = discount;
        self
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// State of node `index`.
    #[must_use]
    pub fn state(&self, index: usize) -> Option<&ReasonerState> {
        self.nodes.get(index).map(|n| &n.state)
    }

    /// Visit count of node `index`.
    #[must_use]
    pub fn visits(&self, index: usize) -> Option<u64> {
        self.nodes.get(index).map(|n| n.visits)
    }

    /// Accumulated value of node `index`.
    #[must_use]
    pub fn value_sum(&self, index: usize) -> Option<f64> {
        self.nodes.get(index).map(|n| n.value_sum)
    }

    /// Children of node `index`.
    #[must_use]
    pub fn children(&self, index: usize) -> &[usize] {
        self.nodes.get(index).map_or(&[], |n| n.children.as_slice())
    }

    /// Actions expanded per node.
    #[must_use]
    pub const fn num_generate(&self) -> usize {
        self.num_generate
    }

    /// Fail unless the tree was built with `num_generate`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::ConfigMismatch`] when it differs.
    pub fn validate_config(&self, num_generate: usize) -> Result<(), CheckpointError> {
        ensure_matches("num_generate", num_generate, self.num_generate)
    }

    /// Highest-reward node below the root.
    #[must_use]
    pub fn best(&self) -> Option<(&ReasonerState, f64)> {
        self.nodes
            .iter()
            .skip(1)
            .map(|n| (&n.state, n.reward))
            .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best })
    }

    fn depth(&self, mut index: usize) -> usize {
        let mut depth = 0;
        while let Some(parent) = self.nodes[index].parent {
            depth += 1;
            index = parent;
        }
        depth
    }

    /// Mark `index` terminal and exhaust every ancestor whose children are all exhausted.
    fn mark_terminal(&mut self, index: usize) {
        self.nodes[index].terminal = true;
        self.nodes[index].exhausted = true;
        let mut current = index;
        while let Some(parent) = self.nodes[current].parent {
            let node = &self.nodes[parent];
            if node.exhausted || !node.children.iter().all(|&c| self.nodes[c].exhausted) {
                break;
            }
            self.nodes[parent].exhausted = true;
            current = parent;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn score(&self, parent: usize, child: usize) -> f64 {
        let node = &self.nodes[child];
        if node.visits == 0 {
            return f64::INFINITY;
        }
        let parent_visits = self.nodes[parent].visits as f64;
        node.mean_value()
            + self.exploration_constant * node.prior * parent_visits.sqrt() / (1.0 + node.visits as f64)
    }

    /// Descend to the leaf to expand next; `None` once the tree is exhausted.
    fn select(&self) -> Option<usize> {
        if self.nodes[0].exhausted {
            return None;
        }
        let mut current = 0;
        loop {
            let node = &self.nodes[current];
            if node.children.is_empty() {
                return Some(current);
            }
            let mut best: Option<(usize, f64)> = None;
            for &child in &node.children {
                if self.nodes[child].exhausted {
                    continue;
                }
                let score = self.score(current, child);
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((child, score));
                }
            }
            current = best?.0;
        }
    }

    fn backup(&mut self, leaf: usize, reward: f64) {
        let mut value = reward;
        let mut current = Some(leaf);
        while let Some(index) = current {
            let node = &mut self.nodes[index];
            node.visits += 1;
            node.value_sum += value;
            value *= self.discount_factor;
            current = node.parent;
        }
    }

    /// Run one selection, expansion and backup.
    ///
    /// # Errors
    ///
    /// Returns a [`SearchError`] if the policy or reward function fails. No
    /// node is added in that case.
    pub async fn simulate(&mut self) -> Result<(), SearchError> {
        if self.start_time.is_none() {
            self.start_time = Some(epoch_seconds(self.time.now()));
        }
        let Some(leaf) = self.select() else {
            tracing::debug!("Tree exhausted, nothing to expand");
            return Ok(());
        };

        let state = &self.nodes[leaf].state;
        let action_set = self.policy.get_actions(state).await?;
        let mut ranked: Vec<(usize, f64)> = action_set
            .priors
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, p)| *p > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(self.num_generate);

        let mut children = Vec::with_capacity(ranked.len());
        for (i, prior) in ranked {
            let action = &action_set.actions[i];
            let mut child = self.policy.apply(action, state, false).await?;
            child.record_info(ACTION_FIELD, json!({ "action": action, "prior": prior }));
            let reward = self.reward_fn.evaluate(&mut child).await?;
            children.push((child, prior, reward));
        }

        if children.is_empty() {
            tracing::debug!(leaf, "Leaf has no actions, marking terminal");
            self.mark_terminal(leaf);
            self.backup(leaf, 0.0);
            return Ok(());
        }
        let count = children.len();
        for (child, prior, reward) in children {
            let index = self.nodes.len();
            self.nodes.push(Node::new(child, Some(leaf), prior, reward));
            self.nodes[leaf].children.push(index);
            self.backup(index, reward);
        }
        tracing::info!(
            leaf,
            depth = self.depth(leaf) + 1,
            children = count,
            nodes = self.nodes.len(),
            "MCTS expansion complete"
        );
        Ok(())
    }

    /// Snapshot of the whole tree.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Serialize`] if a state cannot be converted.
    #[allow(clippy::cast_possible_wrap)]
    pub fn snapshot(&self) -> Result<MctsSnapshot, CheckpointError> {
        let nodes = self
            .nodes
            .iter()
            .map(|n| {
                n.state.to_dict().map_err(|e| CheckpointError::Serialize {
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MctsSnapshot {
            nodes,
            node_rewards: self.nodes.iter().map(|n| n.reward).collect(),
            parent_idx: self
                .nodes
                .iter()
                .map(|n| n.parent.map_or(-1, |p| p as i64))
                .collect(),
            visits: self.nodes.iter().map(|n| n.visits).collect(),
            value_sums: self.nodes.iter().map(|n| n.value_sum).collect(),
            priors: self.nodes.iter().map(|n| n.prior).collect(),
            terminal: self.nodes.iter().map(|n| n.terminal).collect(),
            exploration_constant: self.exploration_constant,
            discount_factor: self.discount_factor,
            num_generate: self.num_generate,
            start_time: self.start_time,
            end_time: self.end_time,
            extra: self.extra.clone(),
        })
    }
}

#[async_trait]
impl<P, R, T> SearchTree for MonteCarloTree<P, R, T>
where
    P: Policy,
    R: RewardFunction,
    T: TimeProvider,
{
    async fn step(&mut self) -> Result<(), SearchError> {
        self.simulate().await
    }

    /// Levels down to the deepest node.
    fn len(&self) -> usize {
        (0..self.nodes.len()).map(|i| self.depth(i)).max().map_or(0, |d| d + 1)
    }

    /// Rewards backed up through the root.
    #[allow(clippy::cast_possible_truncation)]
    fn progress(&self) -> usize {
        self.nodes[0].visits as usize
    }

    fn is_exhausted(&self) -> bool {
        self.nodes[0].exhausted
    }

    fn end_timer(&mut self) {
        self.end_time = Some(epoch_seconds(self.time.now()));
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
    use crate::search::policy::{ActionSet, MockPolicy};
    use crate::search::reward::MockRewardFunction;
    use crate::test_utils::{
        constant_reward, policy_with, property, reward_by_property, root_state as root,
    };
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_first_step_expands_root() {
        let mut tree = MonteCarloTree::new(root(), policy_with(vec![0.1, 0.6, 0.3]), constant_reward(2.0), 2);
        tree.step().await.unwrap();

        assert_eq!(tree.node_count(), 3);
        assert_eq!(tree.children(0), &[1, 2]);
        assert_eq!(tree.visits(0), Some(2));
        assert_eq!(tree.value_sum(0), Some(4.0));
        assert_eq!(tree.state(1).unwrap().include_list, vec!["property 1"]);
        assert_eq!(tree.len(), 2);
    }

    #[tokio::test]
    async fn test_backup_discounts_per_level() {
        let mut tree = MonteCarloTree::new(root(), policy_with(vec![1.0]), constant_reward(1.0), 1)
            .with_discount_factor(0.5);
        tree.step().await.unwrap();
        tree.step().await.unwrap();

        // Second expansion adds node 2 under node 1.
        assert_eq!(tree.children(1), &[2]);
        assert_eq!(tree.value_sum(2), Some(1.0));
        assert_eq!(tree.value_sum(1), Some(1.0 + 0.5));
        assert_eq!(tree.value_sum(0), Some(0.5 + 0.25));
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.progress(), 2);
    }

    #[tokio::test]
    async fn test_selection_prefers_higher_value() {
        let mut tree = MonteCarloTree::new(
            root(),
            policy_with(vec![0.5, 0.5]),
            reward_by_property(vec![5.0, 0.0]),
            2,
        )
        .with_exploration_constant(0.1);
        tree.step().await.unwrap();
        assert_eq!(tree.state(1).unwrap().include_list, vec!["property 0"]);

        tree.step().await.unwrap();
        assert_eq!(tree.children(1), &[3, 4]);
        assert!(tree.children(2).is_empty());
        let (best, reward) = tree.best().unwrap();
        assert_eq!(reward, 5.0);
        assert_eq!(best.include_list, vec!["property 0"]);
    }

    #[tokio::test]
    async fn test_failure_adds_no_node() {
        let mut reward = MockRewardFunction::new();
        reward.expect_evaluate().returning(|_| {
            Err(crate::error::RewardError::Calculator {
                message: "relaxation failed".into(),
            })
        });
        let mut tree = MonteCarloTree::new(root(), policy_with(vec![1.0]), reward, 2);
        assert!(matches!(
            tree.step().await.unwrap_err(),
            SearchError::Reward(_)
        ));
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.visits(0), Some(0));
    }

    #[tokio::test]
    async fn test_dead_end_marks_terminal_and_exhausts() {
        let mut policy = MockPolicy::new();
        policy
            .expect_get_actions()
            .returning(|_| Ok(ActionSet::default()));
        let mut tree = MonteCarloTree::new(root(), policy, MockRewardFunction::new(), 3);

        tree.step().await.unwrap();
        assert!(tree.is_exhausted());
        assert_eq!(tree.visits(0), Some(1));
        tree.step().await.unwrap();
        assert_eq!(tree.node_count(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_propagates_to_root_and_survives_restore() {
        let mut policy = MockPolicy::new();
        policy.expect_get_actions().returning(|state| {
            if state.include_list.is_empty() {
                ActionSet::new(vec![property(0), property(1)], vec![0.5, 0.5])
            } else {
                Ok(ActionSet::default())
            }
        });
        policy
            .expect_apply()
            .returning(|action, state, _| Ok(action.transform(state)));
        let mut tree = MonteCarloTree::new(root(), policy, constant_reward(1.0), 2);

        tree.step().await.unwrap();
        tree.step().await.unwrap();
        assert!(!tree.is_exhausted());
        let partial = SearchTree::to_document(&tree).unwrap();

        tree.step().await.unwrap();
        assert!(tree.is_exhausted());
        assert_eq!(tree.node_count(), 3);

        let restore = |document| {
            MonteCarloTree::from_document(
                document,
                policy_with(vec![1.0]),
                MockRewardFunction::new(),
                ReasonerState::from_dict,
            )
            .unwrap()
        };
        let restored = restore(SearchTree::to_document(&tree).unwrap());
        assert!(restored.is_exhausted());
        let restored = restore(partial);
        assert!(!restored.is_exhausted());
        assert_eq!(restored.select().map(|leaf| restored.nodes[leaf].terminal), Some(false));
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let mut tree = MonteCarloTree::new(root(), policy_with(vec![0.4, 0.6]), constant_reward(1.5), 2)
            .with_exploration_constant(2.0);
        tree.step().await.unwrap();
        tree.step().await.unwrap();
        tree.set_extra("step_times", json!([0.1, 0.2]));

        let document = SearchTree::to_document(&tree).unwrap();
        assert_eq!(document["exploration_constant"], 2.0);
        assert_eq!(document["parent_idx"][0], -1);

        let restored = MonteCarloTree::from_document(
            document,
            policy_with(vec![1.0]),
            MockRewardFunction::new(),
            ReasonerState::from_dict,
        )
        .unwrap();
        assert_eq!(restored.node_count(), tree.node_count());
        assert_eq!(restored.children(0), tree.children(0));
        assert_eq!(restored.visits(0), tree.visits(0));
        assert_eq!(restored.len(), tree.len());
        assert_eq!(restored.extra("step_times"), Some(&json!([0.1, 0.2])));
        assert!(restored.validate_config(2).is_ok());
        assert!(restored.validate_config(3).is_err());
    }
}
