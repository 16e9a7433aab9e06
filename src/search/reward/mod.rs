//! Reward functions.
//!
//! A [`RewardFunction`] scores an answered state, stores the reward on the
//! state and records how it was obtained in the state's `info`. Recoverable
//! failures (unparsable answers, no valid structures) score the configured
//! penalty instead of failing; only malformed input and exhausted external
//! collaborators surface as errors.
//!
//! - [`LlmReward`]: adsorption energies estimated by the language model
//! - [`SimulationReward`]: energies from relaxed structures, cached on disk
//! - [`PathReward`]: activation estimates of reaction paths

mod aggregate;
mod cache;
mod calculator;
mod llm;
mod path;
mod simulation;

use async_trait::async_trait;

use crate::error::RewardError;
use crate::state::ReasonerState;

pub use aggregate::{aggregate_energy_lists, aggregate_min_energies, Aggregate};
pub use cache::ResultCache;
pub use calculator::{
    run_jobs, AdsorptionCalculator, AdsorptionJob, AdsorptionRecord, CommandCalculator,
    JobResults, Placement,
};
pub use llm::{LlmReward, LLM_REWARD_FAILURE_FIELD, LLM_REWARD_FIELD};
pub use path::{PathBreakdown, PathEvaluation, PathReward, ReactionStep};
pub use simulation::{
    adslab_name, reduce_candidate_symbols, LlmSymbolResolver, SimulationReward, SymbolResolver,
    SIMULATION_DETAILS_FIELD, SIMULATION_REWARD_FIELD,
};

#[cfg(test)]
pub use calculator::MockAdsorptionCalculator;
#[cfg(test)]
pub use simulation::MockSymbolResolver;

/// Scores a state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RewardFunction: Send + Sync {
    /// Evaluate `state`, set its reward and return it.
    async fn evaluate(&self, state: &mut ReasonerState) -> Result<f64, RewardError>;
}

#[async_trait]
impl<T: RewardFunction + ?Sized> RewardFunction for Box<T> {
    async fn evaluate(&self, state: &mut ReasonerState) -> Result<f64, RewardError> {
        (**self).evaluate(state).await
    }
}
