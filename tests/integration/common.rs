//! Shared fixtures for the workflow tests.

#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use catalyst_search::error::{LlmError, PolicyError, RewardError};
use catalyst_search::search::reward::{AdsorptionCalculator, AdsorptionJob, AdsorptionRecord, SymbolResolver};
use catalyst_search::search::{Action, ActionSet, Policy, RewardFunction};
use catalyst_search::state::ReasonerState;
use catalyst_search::traits::{
    CompletionConfig, CompletionResponse, EmbeddingClientTrait, LlmClientTrait, Message, Usage,
};

/// Root state for the given adsorbates.
pub fn root_state(adsorbates: &[&str]) -> ReasonerState {
    ReasonerState::new(
        adsorbates.iter().map(|a| (*a).to_string()).collect(),
        "prediction-model",
        "reward-model",
    )
}

/// The `i`-th synthetic include action.
pub fn property(i: usize) -> Action {
    Action::AddInclude(format!("property {i}"))
}

/// Index of the synthetic property last added to `state`.
pub fn last_property(state: &ReasonerState) -> usize {
    state
        .include_list
        .last()
        .and_then(|p| p.trim_start_matches("property ").parse().ok())
        .expect("state has a synthetic property")
}

/// Policy offering one synthetic include action per prior.
pub struct FixedPolicy {
    pub priors: Vec<f64>,
}

impl FixedPolicy {
    pub fn new(priors: Vec<f64>) -> Self {
        Self { priors }
    }
}

#[async_trait]
impl Policy for FixedPolicy {
    async fn get_actions(&self, _state: &ReasonerState) -> Result<ActionSet, PolicyError> {
        ActionSet::new((0..self.priors.len()).map(property).collect(), self.priors.clone())
    }

    async fn apply(
        &self,
        action: &Action,
        state: &ReasonerState,
        _trial: bool,
    ) -> Result<ReasonerState, PolicyError> {
        Ok(action.transform(state))
    }
}

/// Policy that never has an action.
pub struct DeadEndPolicy;

#[async_trait]
impl Policy for DeadEndPolicy {
    async fn get_actions(&self, _state: &ReasonerState) -> Result<ActionSet, PolicyError> {
        Ok(ActionSet::default())
    }

    async fn apply(
        &self,
        action: &Action,
        state: &ReasonerState,
        _trial: bool,
    ) -> Result<ReasonerState, PolicyError> {
        Ok(action.transform(state))
    }
}

/// Reward looked up by the last synthetic property of the state.
pub struct TableReward {
    pub values: Vec<f64>,
    pub calls: AtomicUsize,
}

impl TableReward {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RewardFunction for TableReward {
    async fn evaluate(&self, state: &mut ReasonerState) -> Result<f64, RewardError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let value = self.values[last_property(state)];
        state.set_reward(value, "table-reward");
        Ok(value)
    }
}

/// Reward function that always fails.
pub struct FailingReward;

#[async_trait]
impl RewardFunction for FailingReward {
    async fn evaluate(&self, _state: &mut ReasonerState) -> Result<f64, RewardError> {
        Err(RewardError::Calculator {
            message: "relaxation backend unavailable".into(),
        })
    }
}

/// Chat client replaying scripted answers, then repeating the last one.
pub struct ScriptedClient {
    answers: Vec<Result<String, LlmError>>,
    next: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(answers: Vec<Result<String, LlmError>>) -> Self {
        Self {
            answers,
            next: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClientTrait for ScriptedClient {
    async fn complete(
        &self,
        messages: Vec<Message>,
        _config: CompletionConfig,
    ) -> Result<CompletionResponse, LlmError> {
        if let Some(last) = messages.last() {
            self.prompts.lock().unwrap().push(last.content.clone());
        }
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        let answer = &self.answers[i.min(self.answers.len() - 1)];
        answer
            .clone()
            .map(|content| CompletionResponse::new(content, Usage::new(10, 20)))
    }
}

/// Embedder mapping each text to a vector from a keyword table.
///
/// The last matching keyword wins; texts matching none embed to `fallback`.
pub struct KeywordEmbedder {
    pub table: Vec<(&'static str, Vec<f64>)>,
    pub fallback: Vec<f64>,
}

#[async_trait]
impl EmbeddingClientTrait for KeywordEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>, LlmError> {
        Ok(texts
            .iter()
            .map(|text| {
                self.table
                    .iter()
                    .rev()
                    .find(|(keyword, _)| text.contains(keyword))
                    .map_or_else(|| self.fallback.clone(), |(_, v)| v.clone())
            })
            .collect())
    }
}

/// Calculator returning a fixed energy per adsorbate and counting jobs.
pub struct CountingCalculator {
    pub energies: Vec<(&'static str, f64)>,
    pub batches: AtomicUsize,
    pub jobs: AtomicUsize,
}

impl CountingCalculator {
    pub fn new(energies: Vec<(&'static str, f64)>) -> Self {
        Self {
            energies,
            batches: AtomicUsize::new(0),
            jobs: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AdsorptionCalculator for CountingCalculator {
    #[allow(clippy::cast_precision_loss)]
    async fn relax_batch(&self, jobs: Vec<AdsorptionJob>) -> Result<Vec<AdsorptionRecord>, RewardError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.jobs.fetch_add(jobs.len(), Ordering::SeqCst);
        Ok(jobs
            .iter()
            .map(|job| {
                self.energies
                    .iter()
                    .find(|(ads, _)| *ads == job.adsorbate)
                    .map_or_else(AdsorptionRecord::invalid, |(_, e)| {
                        AdsorptionRecord::valid(e - 0.01 * job.index as f64)
                    })
            })
            .collect())
    }
}

/// Resolver with a fixed symbol table.
pub struct TableResolver {
    pub table: Vec<(&'static str, Option<Vec<&'static str>>)>,
}

#[async_trait]
impl SymbolResolver for TableResolver {
    async fn resolve(&self, candidates: Vec<String>) -> Result<Vec<Option<Vec<String>>>, RewardError> {
        Ok(candidates
            .iter()
            .map(|candidate| {
                self.table
                    .iter()
                    .find(|(name, _)| *name == candidate.as_str())
                    .and_then(|(_, symbols)| symbols.clone())
                    .map(|s| s.into_iter().map(str::to_string).collect())
            })
            .collect())
    }
}
