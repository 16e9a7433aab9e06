//! Workflow integration tests entry point.
//!
//! This module includes all search workflow integration tests:
//! - Beam: expand → select → checkpoint → resume
//! - MCTS: select → expand → backup → checkpoint
//! - Rewards: LLM penalty, simulation cache reuse, reaction paths
//! - Policies: coherent priors

mod integration;
