//! Reward workflow integration tests.
//!
//! Covers the LLM reward retry/penalty path, simulation reward caching and
//! reaction-path evaluation against hand-written collaborators.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::float_cmp
)]

use std::sync::atomic::Ordering;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use catalyst_search::error::LlmError;
use catalyst_search::search::reward::{
    Placement, ReactionStep, ResultCache, LLM_REWARD_FAILURE_FIELD, LLM_REWARD_FIELD,
    SIMULATION_DETAILS_FIELD,
};
use catalyst_search::search::{LlmReward, PathReward, RewardFunction, SimulationReward};
use catalyst_search::state::ReasonerState;

use super::common::{root_state, CountingCalculator, ScriptedClient, TableResolver};

fn answered(adsorbates: &[&str], answer: &str) -> ReasonerState {
    root_state(adsorbates).with_answer(answer)
}

// ============================================================================
// LLM Reward
// ============================================================================

#[tokio::test]
async fn test_llm_reward_penalty_after_max_attempts() {
    let client = Arc::new(ScriptedClient::new(vec![Err(LlmError::UnexpectedResponse {
        message: "empty choices".into(),
    })]));
    let reward = LlmReward::new(Arc::clone(&client), 3, 10.0, -10.0);
    let mut state = answered(&["CO"], "final_answer: [Pt, Cu]");

    let value = reward.evaluate(&mut state).await.unwrap();
    assert_eq!(value, -10.0);
    assert_eq!(state.reward, Some(-10.0));
    assert_eq!(client.calls(), 3);

    let failure = &state.info[LLM_REWARD_FAILURE_FIELD][0];
    assert_eq!(failure["attempts"], 3);
    assert_eq!(failure["errors"].as_array().unwrap().len(), 3);
    assert_eq!(failure["penalty"], -10.0);
}

#[tokio::test]
async fn test_llm_reward_aggregates_across_adsorbates() {
    let client = Arc::new(ScriptedClient::new(vec![
        Ok("final_answer: [-1.5 eV, -0.5 eV]".into()),
        Ok("final_answer: [2.0, 1.0]".into()),
    ]));
    let reward = LlmReward::new(Arc::clone(&client), 3, 10.0, -10.0);
    let mut state = answered(&["CO", "H2O"], "final_answer: [Pt, Cu]");

    let value = reward.evaluate(&mut state).await.unwrap();
    // Mean of |mean(list)| over the two adsorbates: (1.0 + 1.5) / 2.
    assert!((value - 1.25).abs() < 1e-12);
    assert_eq!(client.calls(), 2);
    assert_eq!(state.num_queries, 2);
    assert!(state.info.contains_key(LLM_REWARD_FIELD));
    assert!(!state.info.contains_key(LLM_REWARD_FAILURE_FIELD));
}

#[tokio::test]
async fn test_llm_reward_retries_past_limit() {
    let client = Arc::new(ScriptedClient::new(vec![
        Ok("final_answer: [-50.0]".into()),
        Ok("no list at all".into()),
        Ok("final_answer: [-0.8]".into()),
    ]));
    let reward = LlmReward::new(Arc::clone(&client), 3, 10.0, -10.0);
    let mut state = answered(&["CO"], "final_answer: [Pt]");

    let value = reward.evaluate(&mut state).await.unwrap();
    assert!((value - 0.8).abs() < 1e-12);
    assert_eq!(client.calls(), 3);
}

// ============================================================================
// Simulation Reward
// ============================================================================

fn resolver() -> TableResolver {
    TableResolver {
        table: vec![
            ("PtNi", Some(vec!["Pt", "Ni"])),
            ("Cu", Some(vec!["Cu"])),
            ("Unobtainium", None),
        ],
    }
}

#[tokio::test]
async fn test_simulation_reward_reuses_cache() {
    let dir = tempfile::tempdir().unwrap();
    let calculator = Arc::new(CountingCalculator::new(vec![("CO", -1.0)]));
    let reward = SimulationReward::new(
        Arc::clone(&calculator),
        resolver(),
        ResultCache::new(dir.path()),
        Placement::Random { samples: 2 },
        3,
        -10.0,
    );

    let mut first = answered(&["CO"], "final_answer: [PtNi, Cu]");
    let value = reward.evaluate(&mut first).await.unwrap();
    assert!((value - 1.01).abs() < 1e-12);
    assert_eq!(calculator.jobs.load(Ordering::SeqCst), 4);
    // Three jobs per batch, the last one flushed alone.
    assert_eq!(calculator.batches.load(Ordering::SeqCst), 2);
    assert!(dir.path().join("PtNi_CO").join("1.json").exists());
    assert!(dir.path().join("Cu_CO").join("0.json").exists());

    let mut second = answered(&["CO"], "final_answer: [PtNi, Cu]");
    let again = reward.evaluate(&mut second).await.unwrap();
    assert_eq!(again, value);
    assert_eq!(calculator.jobs.load(Ordering::SeqCst), 4);
    assert_eq!(calculator.batches.load(Ordering::SeqCst), 2);
    let details = &second.info[SIMULATION_DETAILS_FIELD][0];
    assert_eq!(details["cached"], 4);
    assert_eq!(details["calculated"], 0);
}

#[tokio::test]
async fn test_simulation_reward_unresolved_candidate_scores_penalty() {
    let dir = tempfile::tempdir().unwrap();
    let reward = SimulationReward::new(
        CountingCalculator::new(vec![("CO", -1.0)]),
        resolver(),
        ResultCache::new(dir.path()),
        Placement::Random { samples: 2 },
        10,
        -10.0,
    );
    let mut state = answered(&["CO"], "final_answer: [Cu, Unobtainium]");
    let value = reward.evaluate(&mut state).await.unwrap();
    assert!((value - (1.01 + -10.0) / 2.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_simulation_reward_without_valid_structures() {
    let dir = tempfile::tempdir().unwrap();
    let reward = SimulationReward::new(
        CountingCalculator::new(vec![("OH", -0.4)]),
        resolver(),
        ResultCache::new(dir.path()),
        Placement::Random { samples: 2 },
        10,
        -10.0,
    );
    let mut state = answered(&["CO"], "final_answer: [Cu]");
    assert_eq!(reward.evaluate(&mut state).await.unwrap(), -10.0);
    assert_eq!(
        state.info[SIMULATION_DETAILS_FIELD][0]["reason"],
        "no valid structures"
    );

    let mut unanswered = root_state(&["CO"]);
    assert_eq!(reward.evaluate(&mut unanswered).await.unwrap(), -10.0);
}

// ============================================================================
// Path Reward
// ============================================================================

fn step(symbols: &[&str], adsorbate: &str) -> ReactionStep {
    ReactionStep {
        symbols: symbols.iter().map(|s| (*s).to_string()).collect(),
        adsorbate: adsorbate.to_string(),
        name: format!("*{adsorbate}"),
    }
}

#[tokio::test]
async fn test_path_reward_picks_lowest_activation() {
    let dir = tempfile::tempdir().unwrap();
    let reward = PathReward::new(
        CountingCalculator::new(vec![("CO", -1.0), ("OH", -0.2)]),
        ResultCache::new(dir.path()),
        2,
        10,
        -10.0,
    );
    let paths = vec![
        vec![step(&["Cu"], "CO"), step(&["Cu"], "OH")],
        vec![step(&["Pt"], "CO"), step(&["Pt"], "H")],
    ];

    let evaluation = reward.evaluate_paths(&paths).await.unwrap();
    assert_eq!(evaluation.best_index, Some(0));
    assert!((evaluation.best_value - 0.8).abs() < 1e-9);
    assert_eq!(evaluation.paths[1].energies[1], None);
    assert!(evaluation.paths[1].activation.is_infinite());
}

#[tokio::test]
async fn test_path_reward_all_paths_failed() {
    let dir = tempfile::tempdir().unwrap();
    let reward = PathReward::new(
        CountingCalculator::new(vec![]),
        ResultCache::new(dir.path()),
        2,
        10,
        -10.0,
    );
    let evaluation = reward
        .evaluate_paths(&[vec![step(&["Cu"], "CO")]])
        .await
        .unwrap();
    assert_eq!(evaluation.best_index, None);
    assert_eq!(evaluation.best_value, -10.0);
    assert!(reward.evaluate_paths(&[vec![]]).await.is_err());
}
