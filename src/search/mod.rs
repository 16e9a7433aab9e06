//! Tree search over catalyst prompts.
//!
//! Trees grow one [`SearchTree::step`] at a time. Each step asks a
//! [`Policy`](policy::Policy) for actions, materializes successor states and
//! scores them with a [`RewardFunction`](reward::RewardFunction). The tree
//! itself never runs concurrently with anything; only the policy and reward
//! calls suspend.
//!
//! - [`BeamSearchTree`]: level-by-level expansion keeping the best `num_keep`
//! - [`MonteCarloTree`]: PUCT selection with discounted backup
//!
//! Both persist to JSON documents with [`SearchTree::step_save`], so a
//! crashed run loses at most the step in flight.

pub mod beam;
pub mod checkpoint;
pub mod mcts;
pub mod policy;
pub mod reward;

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CheckpointError, SearchError};

pub use beam::BeamSearchTree;
pub use checkpoint::{read_document, write_document, BeamSnapshot, MctsSnapshot};
pub use mcts::MonteCarloTree;
pub use policy::{Action, ActionSet, CoherentPolicy, Policy, ReasonerPolicy};
pub use reward::{LlmReward, PathReward, RewardFunction, SimulationReward};

/// Operations the driver needs from any tree.
#[async_trait]
pub trait SearchTree: Send {
    /// Advance the search by one step.
    async fn step(&mut self) -> Result<(), SearchError>;

    /// Number of levels, counting the root level.
    fn len(&self) -> usize;

    /// True when the tree has no levels.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Progress compared against the configured depth.
    fn progress(&self) -> usize {
        self.len()
    }

    /// True when no further step can add a node.
    fn is_exhausted(&self) -> bool;

    /// Stamp the end time.
    fn end_timer(&mut self);

    /// Store an extra key in the persisted document.
    fn set_extra(&mut self, key: &str, value: Value);

    /// An extra key restored from a document.
    fn extra(&self, key: &str) -> Option<&Value>;

    /// The persisted document for the current tree.
    fn to_document(&self) -> Result<Value, CheckpointError>;

    /// Step, stamp the end time and overwrite the checkpoint at `path`.
    async fn step_save(&mut self, path: &Path) -> Result<(), SearchError> {
        self.step().await?;
        self.end_timer();
        let document = self.to_document()?;
        write_document(path, &document).await?;
        Ok(())
    }
}
