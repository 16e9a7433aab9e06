//! Per-item search loop.
//!
//! The binary resolves the configured selectors into boxed policies and
//! reward functions, restores or creates one tree per dataset row and runs it
//! with [`run_search`]. A failed step halts that row only; its last
//! checkpoint stays on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use crate::config::{PolicyKind, RewardKind, SearchConfig, SearchMethod};
use crate::error::{CheckpointError, ConfigError, SearchError};
use crate::search::reward::{CommandCalculator, LlmSymbolResolver, Placement, ResultCache};
use crate::search::{
    read_document, write_document, BeamSearchTree, CoherentPolicy, LlmReward, MonteCarloTree,
    Policy, ReasonerPolicy, RewardFunction, SearchTree, SimulationReward,
};
use crate::state::ReasonerState;
use crate::traits::{EmbeddingClientTrait, LlmClientTrait};

/// Extra document key holding the accumulated wall time in seconds.
pub const TOTAL_TIME_FIELD: &str = "total_time";

/// Extra document key holding per-step wall times in seconds.
pub const STEP_TIMES_FIELD: &str = "step_times";

/// Boxed policy chosen at run time.
pub type DynPolicy = Box<dyn Policy>;

/// Boxed reward function chosen at run time.
pub type DynReward = Box<dyn RewardFunction>;

/// Boxed tree chosen at run time.
pub type DynTree = Box<dyn SearchTree>;

/// How one item's search ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// The tree reached the configured depth.
    Completed {
        /// Steps taken in this run.
        steps: usize,
    },
    /// No further step could add a node.
    Exhausted {
        /// Steps taken in this run.
        steps: usize,
    },
    /// A step failed; the last checkpoint is kept.
    Halted {
        /// Steps completed before the failure.
        steps: usize,
        /// The failure.
        error: String,
    },
}

impl SearchOutcome {
    /// True for [`SearchOutcome::Halted`].
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        matches!(self, Self::Halted { .. })
    }
}

/// Checkpoint file of item `index`.
#[must_use]
pub fn checkpoint_path(savedir: &Path, index: usize) -> PathBuf {
    savedir.join(format!("search_tree_{index}.json"))
}

/// Policy for the configured selector.
pub fn build_policy<C>(config: &SearchConfig, client: &Arc<C>) -> DynPolicy
where
    C: LlmClientTrait + EmbeddingClientTrait + 'static,
{
    let reasoner = ReasonerPolicy::new(Arc::clone(client));
    match config.policy {
        PolicyKind::ReasonerPolicy => Box::new(reasoner),
        PolicyKind::CoherentPolicy => Box::new(CoherentPolicy::new(
            reasoner,
            Arc::clone(client),
            config.temperature,
        )),
    }
}

/// Reward function for the configured selector.
///
/// # Errors
///
/// Returns [`ConfigError::MissingRequired`] when the simulation reward is
/// selected without a relaxation command.
pub fn build_reward<C>(
    config: &SearchConfig,
    client: &Arc<C>,
    reward_model: &str,
) -> Result<DynReward, ConfigError>
where
    C: LlmClientTrait + 'static,
{
    match config.reward {
        RewardKind::LlmReward => Ok(Box::new(LlmReward::new(
            Arc::clone(client),
            config.reward_max_attempts,
            config.reward_limit,
            config.penalty_value,
        ))),
        RewardKind::SimulationReward => {
            let command = config
                .gnn_command
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingRequired {
                    var: "gnn-command".into(),
                })?;
            let calculator = CommandCalculator::new(command, config.gnn_model.clone())
                .with_device(config.gnn_device)
                .with_fmax(config.gnn_fmax)
                .with_steps(config.gnn_steps)
                .with_traj_dir(config.traj_dir.clone());
            Ok(Box::new(SimulationReward::new(
                calculator,
                LlmSymbolResolver::new(Arc::clone(client), reward_model),
                ResultCache::new(config.traj_dir.clone()),
                Placement::from_kind(config.placement, config.num_adslab_samples),
                config.gnn_batch_size,
                config.penalty_value,
            )))
        }
    }
}

/// Restore the tree persisted at `path`, or create one rooted at `root`.
///
/// A missing or empty file starts a new tree.
///
/// # Errors
///
/// Returns a [`CheckpointError`] if the file is unreadable, corrupt, or was
/// written with a different configuration.
pub async fn restore_or_create(
    config: &SearchConfig,
    root: ReasonerState,
    policy: DynPolicy,
    reward_fn: DynReward,
    path: &Path,
) -> Result<DynTree, CheckpointError> {
    let document = read_document(path).await?;
    let resumed = document.is_some();
    let tree: DynTree = match (config.method, document) {
        (SearchMethod::BeamSearch, Some(document)) => {
            let tree = BeamSearchTree::from_document(document, policy, reward_fn, ReasonerState::from_dict)?;
            tree.validate_config(config.num_keep, config.num_generate, config.polarity)?;
            Box::new(tree)
        }
        (SearchMethod::BeamSearch, None) => Box::new(
            BeamSearchTree::new(root, policy, reward_fn, config.num_generate, config.num_keep)
                .with_polarity(config.polarity),
        ),
        (SearchMethod::Mcts, Some(document)) => {
            let tree = MonteCarloTree::from_document(document, policy, reward_fn, ReasonerState::from_dict)?;
            tree.validate_config(config.num_generate)?;
            Box::new(tree)
        }
        (SearchMethod::Mcts, None) => Box::new(
            MonteCarloTree::new(root, policy, reward_fn, config.num_generate)
                .with_exploration_constant(config.exploration_constant)
                .with_discount_factor(config.discount_factor),
        ),
    };
    tracing::info!(
        path = %path.display(),
        method = %config.method,
        resumed,
        progress = tree.progress(),
        "Search tree ready"
    );
    Ok(tree)
}

/// Restore or create the tree for one item and run it to `depth`.
///
/// An unreadable or corrupt checkpoint halts this item only.
///
/// # Errors
///
/// Returns [`CheckpointError::ConfigMismatch`] when the checkpoint was
/// written with another configuration. Every later item would hit the same
/// mismatch, so the caller should stop the batch.
pub async fn search_item(
    config: &SearchConfig,
    root: ReasonerState,
    policy: DynPolicy,
    reward_fn: DynReward,
    path: &Path,
) -> Result<SearchOutcome, CheckpointError> {
    let mut tree = match restore_or_create(config, root, policy, reward_fn, path).await {
        Ok(tree) => tree,
        Err(e @ CheckpointError::ConfigMismatch { .. }) => return Err(e),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Cannot restore search tree");
            return Ok(SearchOutcome::Halted {
                steps: 0,
                error: e.to_string(),
            });
        }
    };
    Ok(run_search(tree.as_mut(), config.depth, path).await)
}

/// Step `tree` until its progress reaches `depth`, checkpointing to `path`
/// after every step.
///
/// Step wall times accumulate into the `total_time` and `step_times` extras,
/// continuing the values restored from an earlier run.
pub async fn run_search(tree: &mut dyn SearchTree, depth: usize, path: &Path) -> SearchOutcome {
    let mut total_time = tree
        .extra(TOTAL_TIME_FIELD)
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let mut step_times: Vec<f64> = tree
        .extra(STEP_TIMES_FIELD)
        .and_then(Value::as_array)
        .map(|times| times.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default();
    let mut steps = 0;

    while tree.progress() < depth {
        if tree.is_exhausted() {
            tracing::info!(steps, progress = tree.progress(), "Search exhausted");
            return SearchOutcome::Exhausted { steps };
        }
        let started = Instant::now();
        if let Err(e) = checkpoint_step(tree, path, started, &mut total_time, &mut step_times).await {
            tracing::warn!(error = %e, steps, path = %path.display(), "Search step failed, halting");
            return SearchOutcome::Halted {
                steps,
                error: e.to_string(),
            };
        }
        steps += 1;
        tracing::info!(
            progress = tree.progress(),
            depth,
            step_time = step_times.last().copied().unwrap_or_default(),
            "Search step saved"
        );
    }
    SearchOutcome::Completed { steps }
}

async fn checkpoint_step(
    tree: &mut dyn SearchTree,
    path: &Path,
    started: Instant,
    total_time: &mut f64,
    step_times: &mut Vec<f64>,
) -> Result<(), SearchError> {
    tree.step().await?;
    let elapsed = started.elapsed().as_secs_f64();
    *total_time += elapsed;
    step_times.push(elapsed);
    tree.set_extra(TOTAL_TIME_FIELD, json!(*total_time));
    tree.set_extra(STEP_TIMES_FIELD, json!(step_times));
    tree.end_timer();
    let document = tree.to_document()?;
    write_document(path, &document).await?;
    Ok(())
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
    use crate::config::RewardPolarity;
    use crate::error::PolicyError;
    use crate::search::policy::MockPolicy;
    use crate::search::reward::MockRewardFunction;
    use crate::test_utils::{constant_reward, policy_with, reward_by_property, root_state};
    use pretty_assertions::assert_eq;

    fn beam_config() -> SearchConfig {
        SearchConfig {
            num_generate: 2,
            num_keep: 2,
            depth: 3,
            ..SearchConfig::default()
        }
    }

    #[test]
    fn test_checkpoint_path() {
        assert_eq!(
            checkpoint_path(Path::new("out"), 7),
            PathBuf::from("out/search_tree_7.json")
        );
    }

    #[tokio::test]
    async fn test_run_search_reaches_depth_and_records_times() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), 0);
        let config = beam_config();
        let mut tree = restore_or_create(
            &config,
            root_state(),
            Box::new(policy_with(vec![0.5, 0.5])),
            Box::new(reward_by_property(vec![1.0, 2.0])),
            &path,
        )
        .await
        .unwrap();

        let outcome = run_search(tree.as_mut(), config.depth, &path).await;
        assert_eq!(outcome, SearchOutcome::Completed { steps: 2 });

        let document = read_document(&path).await.unwrap().unwrap();
        assert_eq!(document["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(document[STEP_TIMES_FIELD].as_array().unwrap().len(), 2);
        assert!(document[TOTAL_TIME_FIELD].as_f64().unwrap() >= 0.0);
        assert!(document["end_time"].is_number());
    }

    #[tokio::test]
    async fn test_resume_continues_and_keeps_times() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), 1);
        let mut config = beam_config();
        config.depth = 2;
        let mut tree = restore_or_create(
            &config,
            root_state(),
            Box::new(policy_with(vec![1.0])),
            Box::new(constant_reward(1.0)),
            &path,
        )
        .await
        .unwrap();
        run_search(tree.as_mut(), config.depth, &path).await;

        config.depth = 3;
        let mut resumed = restore_or_create(
            &config,
            root_state(),
            Box::new(policy_with(vec![1.0])),
            Box::new(constant_reward(1.0)),
            &path,
        )
        .await
        .unwrap();
        assert_eq!(resumed.len(), 2);
        let outcome = run_search(resumed.as_mut(), config.depth, &path).await;
        assert_eq!(outcome, SearchOutcome::Completed { steps: 1 });

        let document = read_document(&path).await.unwrap().unwrap();
        assert_eq!(document[STEP_TIMES_FIELD].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resume_rejects_other_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), 2);
        let config = beam_config();
        let mut tree = restore_or_create(
            &config,
            root_state(),
            Box::new(policy_with(vec![1.0])),
            Box::new(constant_reward(1.0)),
            &path,
        )
        .await
        .unwrap();
        run_search(tree.as_mut(), 2, &path).await;

        let other = SearchConfig {
            num_keep: 5,
            ..beam_config()
        };
        let result = restore_or_create(
            &other,
            root_state(),
            Box::new(MockPolicy::new()),
            Box::new(MockRewardFunction::new()),
            &path,
        )
        .await;
        assert!(matches!(result, Err(CheckpointError::ConfigMismatch { .. })));
    }

    #[tokio::test]
    async fn test_search_item_mismatch_is_fatal_and_corruption_halts() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), 6);
        let config = SearchConfig {
            depth: 2,
            ..beam_config()
        };
        let outcome = search_item(
            &config,
            root_state(),
            Box::new(policy_with(vec![1.0])),
            Box::new(constant_reward(1.0)),
            &path,
        )
        .await
        .unwrap();
        assert_eq!(outcome, SearchOutcome::Completed { steps: 1 });
        let before = std::fs::read_to_string(&path).unwrap();

        let flipped = SearchConfig {
            polarity: RewardPolarity::LowerIsBetter,
            ..config.clone()
        };
        let err = search_item(
            &flipped,
            root_state(),
            Box::new(MockPolicy::new()),
            Box::new(MockRewardFunction::new()),
            &path,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CheckpointError::ConfigMismatch { ref field, .. } if field == "polarity"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);

        std::fs::write(&path, "{ not json").unwrap();
        let outcome = search_item(
            &config,
            root_state(),
            Box::new(MockPolicy::new()),
            Box::new(MockRewardFunction::new()),
            &path,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, SearchOutcome::Halted { steps: 0, .. }));
    }

    #[tokio::test]
    async fn test_failed_step_halts_and_keeps_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), 3);
        let config = beam_config();
        let mut tree = restore_or_create(
            &config,
            root_state(),
            Box::new(policy_with(vec![1.0])),
            Box::new(constant_reward(1.0)),
            &path,
        )
        .await
        .unwrap();
        run_search(tree.as_mut(), 2, &path).await;
        let before = std::fs::read_to_string(&path).unwrap();

        let mut policy = MockPolicy::new();
        policy.expect_get_actions().returning(|_| {
            Err(PolicyError::Similarity {
                message: "embedding service down".into(),
            })
        });
        let mut resumed = restore_or_create(
            &config,
            root_state(),
            Box::new(policy),
            Box::new(MockRewardFunction::new()),
            &path,
        )
        .await
        .unwrap();
        let outcome = run_search(resumed.as_mut(), config.depth, &path).await;
        assert!(outcome.is_halted());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_exhausted_tree_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), 4);
        let mut policy = MockPolicy::new();
        policy
            .expect_get_actions()
            .returning(|_| Ok(crate::search::ActionSet::default()));
        let config = SearchConfig {
            depth: 10,
            ..beam_config()
        };
        let mut tree = restore_or_create(
            &config,
            root_state(),
            Box::new(policy),
            Box::new(MockRewardFunction::new()),
            &path,
        )
        .await
        .unwrap();
        let outcome = run_search(tree.as_mut(), config.depth, &path).await;
        assert_eq!(outcome, SearchOutcome::Exhausted { steps: 1 });
    }

    #[tokio::test]
    async fn test_mcts_progress_counts_simulations() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), 5);
        let config = SearchConfig {
            method: SearchMethod::Mcts,
            num_generate: 2,
            depth: 3,
            polarity: RewardPolarity::HigherIsBetter,
            ..SearchConfig::default()
        };
        let mut tree = restore_or_create(
            &config,
            root_state(),
            Box::new(policy_with(vec![0.5, 0.5])),
            Box::new(constant_reward(1.0)),
            &path,
        )
        .await
        .unwrap();
        // Each expansion backs up two children through the root.
        let outcome = run_search(tree.as_mut(), config.depth, &path).await;
        assert_eq!(outcome, SearchOutcome::Completed { steps: 2 });
        assert_eq!(tree.progress(), 4);
    }

    #[test]
    fn test_simulation_reward_requires_command() {
        let config = SearchConfig {
            reward: RewardKind::SimulationReward,
            ..SearchConfig::default()
        };
        let client = Arc::new(crate::llm::LlmClient::with_api_key("sk-test").unwrap());
        let result = build_reward(&config, &client, "gpt-4");
        assert!(matches!(result, Err(ConfigError::MissingRequired { ref var }) if var == "gnn-command"));
        assert!(build_reward(&SearchConfig::default(), &client, "gpt-4").is_ok());
    }
}
