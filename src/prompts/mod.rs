//! Prompt templates and answer parsing.
//!
//! Prompts are organized into submodules:
//! - `generation`: candidate generation from a search state
//! - `reward`: adsorption energy and element-symbol queries
//! - `parse`: extraction of `final_answer` lists from model output
//!
//! # Example
//!
//! ```
//! use catalyst_search::prompts::{generation_prompt, GenerationPrompt, DEFAULT_GENERATION_TEMPLATE};
//!
//! let adsorbates = vec!["CO".to_string()];
//! let prompt = generation_prompt(&GenerationPrompt {
//!     template: DEFAULT_GENERATION_TEMPLATE,
//!     catalyst_label: "catalysts",
//!     num_answers: 3,
//!     candidate_list: &[],
//!     relation_to_candidate_list: None,
//!     include_list: &[],
//!     exclude_list: &[],
//!     adsorbates: &adsorbates,
//! })
//! .unwrap();
//! assert!(prompt.contains("step-by-step"));
//! ```

mod generation;
mod parse;
mod reward;

pub use generation::{fill_template, generation_prompt, GenerationPrompt, DEFAULT_GENERATION_TEMPLATE};
pub use parse::{parse_answer, parse_energy_list, parse_symbols_answer};
pub use reward::{
    adsorption_energy_list_prompt, symbols_prompt, REWARD_SYSTEM_PROMPT, SYMBOLS_SYSTEM_PROMPT,
};
