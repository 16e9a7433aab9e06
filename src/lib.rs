//! Catalyst Search
//!
//! Language-model guided search for heterogeneous catalysts. A search state
//! holds a generation prompt and the model's answer; policies propose edits
//! to the prompt, reward functions score the proposed catalysts, and a beam
//! search or Monte Carlo tree keeps the most promising prompts.
//!
//! # Features
//!
//! - Beam search and Monte Carlo tree search with resumable JSON checkpoints
//! - Heuristic and embedding-coherent action policies
//! - Rewards from the language model, from relaxed adsorbate/slab structures
//!   (cached on disk), or from reaction-path activation estimates
//! - OpenAI-compatible chat-completion and embedding client with retry
//!
//! # Quick Start
//!
//! ```bash
//! LLM_API_KEY=sk-xxx ./catalyst-search --dataset-path data/input.json --savedir out
//! ```
//!
//! # Architecture
//!
//! ```text
//! dataset row ──▶ root state ──▶ SearchTree::step_save ──▶ search_tree_{i}.json
//!                                   │          │
//!                                Policy   RewardFunction
//!                                   │          │
//!                                   ▼          ▼
//!                                chat / embedding API, relaxation command
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dataset;
pub mod driver;
pub mod error;
pub mod llm;
pub mod prompts;
pub mod search;
pub mod state;
pub mod traits;

#[cfg(test)]
mod test_utils;
