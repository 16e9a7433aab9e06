//! Integration tests for catalyst search.
//!
//! These tests drive the public API end to end with hand-written policies,
//! reward functions and calculators:
//! - Beam search selection invariants and scenarios
//! - Monte Carlo tree growth and persistence
//! - Reward evaluation recovery paths
//! - Coherent policy re-weighting

mod common;
mod error_recovery;
mod workflow_beam;
mod workflow_mcts;
mod workflow_policy;
mod workflow_reward;
