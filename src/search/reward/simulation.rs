//! Reward from relaxed adsorption structures.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::aggregate::{aggregate_min_energies, Aggregate};
use super::cache::ResultCache;
use super::calculator::{run_jobs, AdsorptionCalculator, AdsorptionJob, Placement};
use super::RewardFunction;
use crate::error::RewardError;
use crate::prompts::{parse_symbols_answer, symbols_prompt, SYMBOLS_SYSTEM_PROMPT};
use crate::state::ReasonerState;
use crate::traits::{CompletionConfig, LlmClientTrait, Message};

/// Info field holding the reward value.
pub const SIMULATION_REWARD_FIELD: &str = "simulation-reward";

/// Info field holding the per-candidate breakdown.
pub const SIMULATION_DETAILS_FIELD: &str = "simulation-reward-details";

/// Maps candidate names to element symbols.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SymbolResolver: Send + Sync {
    /// Symbols per candidate, `None` where a candidate has no composition.
    async fn resolve(&self, candidates: Vec<String>) -> Result<Vec<Option<Vec<String>>>, RewardError>;
}

/// Resolves symbols by asking the language model.
pub struct LlmSymbolResolver<C>
where
    C: LlmClientTrait,
{
    client: C,
    model: String,
}

impl<C> LlmSymbolResolver<C>
where
    C: LlmClientTrait,
{
    /// Resolver asking `model`.
    #[must_use]
    pub fn new(client: C, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl<C> SymbolResolver for LlmSymbolResolver<C>
where
    C: LlmClientTrait,
{
    async fn resolve(&self, candidates: Vec<String>) -> Result<Vec<Option<Vec<String>>>, RewardError> {
        let config = CompletionConfig::new()
            .with_model(self.model.clone())
            .with_system_prompt(SYMBOLS_SYSTEM_PROMPT);
        let response = self
            .client
            .complete(vec![Message::user(symbols_prompt(&candidates))], config)
            .await
            .map_err(|e| RewardError::Query {
                message: e.to_string(),
            })?;
        Ok(parse_symbols_answer(&response.content, &candidates))
    }
}

/// Slab name for a symbol list.
///
/// One symbol is kept, two are concatenated, and longer lists keep the first
/// symbol followed by the rest sorted.
///
/// ```
/// use catalyst_search::search::reward::reduce_candidate_symbols;
///
/// assert_eq!(reduce_candidate_symbols(&["Pt".into()]), "Pt");
/// assert_eq!(reduce_candidate_symbols(&["Pt".into(), "Cu".into()]), "PtCu");
/// assert_eq!(
///     reduce_candidate_symbols(&["Pt".into(), "Ni".into(), "Cu".into()]),
///     "PtCuNi"
/// );
/// ```
#[must_use]
pub fn reduce_candidate_symbols(symbols: &[String]) -> String {
    match symbols {
        [] => String::new(),
        [first, rest @ ..] if rest.len() > 1 => {
            let mut rest = rest.to_vec();
            rest.sort();
            std::iter::once(first.clone()).chain(rest).collect()
        }
        _ => symbols.concat(),
    }
}

/// Adslab name, `{slab}_{adsorbate}`.
#[must_use]
pub fn adslab_name(slab: &str, adsorbate: &str) -> String {
    format!("{slab}_{adsorbate}")
}

/// Scores a state by relaxing its candidates with each adsorbate.
///
/// Candidates are resolved to element symbols, every `(slab, adsorbate,
/// placement)` combination becomes a job, and the minimum valid energy per
/// adsorbate feeds [`aggregate_min_energies`]. A state with nothing to
/// score gets `penalty_value`.
pub struct SimulationReward<A, S>
where
    A: AdsorptionCalculator,
    S: SymbolResolver,
{
    calculator: A,
    resolver: S,
    cache: ResultCache,
    placement: Placement,
    batch_size: usize,
    penalty_value: f64,
}

impl<A, S> SimulationReward<A, S>
where
    A: AdsorptionCalculator,
    S: SymbolResolver,
{
    /// Create a simulation reward.
    #[must_use]
    pub const fn new(
        calculator: A,
        resolver: S,
        cache: ResultCache,
        placement: Placement,
        batch_size: usize,
        penalty_value: f64,
    ) -> Self {
        Self {
            calculator,
            resolver,
            cache,
            placement,
            batch_size,
            penalty_value,
        }
    }

    fn penalize(&self, state: &mut ReasonerState, reason: &str) -> f64 {
        tracing::warn!(reason, penalty = self.penalty_value, "Simulation reward penalized");
        state.record_info(
            SIMULATION_DETAILS_FIELD,
            json!({ "penalty": self.penalty_value, "reason": reason }),
        );
        state.set_reward(self.penalty_value, SIMULATION_REWARD_FIELD);
        self.penalty_value
    }
}

#[async_trait]
impl<A, S> RewardFunction for SimulationReward<A, S>
where
    A: AdsorptionCalculator,
    S: SymbolResolver,
{
    async fn evaluate(&self, state: &mut ReasonerState) -> Result<f64, RewardError> {
        let candidates = state.candidates();
        if candidates.is_empty() {
            return Ok(self.penalize(state, "no candidates"));
        }
        let symbols = self.resolver.resolve(candidates.clone()).await?;
        if symbols.len() != candidates.len() {
            return Err(RewardError::MalformedInput {
                reason: format!(
                    "{} symbol lists for {} candidates",
                    symbols.len(),
                    candidates.len()
                ),
            });
        }

        let slabs: Vec<Option<(String, Vec<String>)>> = symbols
            .into_iter()
            .map(|s| s.map(|s| (reduce_candidate_symbols(&s), s)))
            .collect();
        let mut jobs = Vec::new();
        for (slab, slab_symbols) in slabs.iter().flatten() {
            for adsorbate in &state.ads_symbols {
                let name = adslab_name(slab, adsorbate);
                jobs.extend(self.placement.indices().map(|index| AdsorptionJob {
                    name: name.clone(),
                    index,
                    slab_symbols: slab_symbols.clone(),
                    adsorbate: adsorbate.clone(),
                    placement: self.placement.kind(),
                }));
            }
        }
        let results = run_jobs(&self.calculator, &self.cache, jobs, self.batch_size).await?;

        let mut breakdown = Map::new();
        let per_candidate: Vec<Vec<Vec<f64>>> = candidates
            .iter()
            .zip(&slabs)
            .map(|(candidate, slab)| {
                let energies: Vec<Vec<f64>> = state
                    .ads_symbols
                    .iter()
                    .map(|adsorbate| match slab {
                        Some((slab, _)) => {
                            results.energies(&adslab_name(slab, adsorbate), self.placement.indices())
                        }
                        None => Vec::new(),
                    })
                    .collect();
                breakdown.insert(
                    candidate.clone(),
                    json!({
                        "slab": slab.as_ref().map(|(name, _)| name),
                        "min_energies": energies
                            .iter()
                            .map(|e| e.iter().copied().reduce(f64::min))
                            .collect::<Vec<_>>(),
                    }),
                );
                energies
            })
            .collect();

        match aggregate_min_energies(&per_candidate, &state.ads_preferences, self.penalty_value) {
            Aggregate::Value(value) => {
                state.record_info(
                    SIMULATION_DETAILS_FIELD,
                    json!({
                        "candidates": Value::Object(breakdown),
                        "cached": results.cached,
                        "calculated": results.calculated,
                    }),
                );
                state.set_reward(value, SIMULATION_REWARD_FIELD);
                Ok(value)
            }
            Aggregate::NoValidData => Ok(self.penalize(state, "no valid structures")),
            Aggregate::Malformed(reason) => Err(RewardError::MalformedInput { reason }),
        }
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
    use crate::search::reward::calculator::{AdsorptionRecord, MockAdsorptionCalculator};
    use crate::traits::{CompletionResponse, MockLlmClientTrait, Usage};
    use test_case::test_case;

    fn answered() -> ReasonerState {
        ReasonerState::new(vec!["CO".into()], "p", "r").with_answer("final_answer: [Platinum, Clay]")
    }

    fn resolver() -> MockSymbolResolver {
        let mut resolver = MockSymbolResolver::new();
        resolver
            .expect_resolve()
            .returning(|_| Ok(vec![Some(vec!["Pt".into()]), None]));
        resolver
    }

    #[test_case(&[], "" ; "empty")]
    #[test_case(&["Cu"], "Cu" ; "single")]
    #[test_case(&["Zn", "Cu"], "ZnCu" ; "pair keeps order")]
    #[test_case(&["Zn", "Ni", "Cu", "Ag"], "ZnAgCuNi" ; "rest sorted")]
    fn test_reduce_candidate_symbols(symbols: &[&str], expected: &str) {
        let symbols: Vec<String> = symbols.iter().map(ToString::to_string).collect();
        assert_eq!(reduce_candidate_symbols(&symbols), expected);
    }

    #[tokio::test]
    async fn test_evaluate_scores_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let mut calculator = MockAdsorptionCalculator::new();
        calculator
            .expect_relax_batch()
            .times(1)
            .returning(|jobs| {
                assert!(jobs.iter().all(|j| j.name == "Pt_CO"));
                Ok(vec![
                    AdsorptionRecord::valid(-1.0),
                    AdsorptionRecord::valid(-2.0),
                    AdsorptionRecord::invalid(),
                ])
            });
        let reward = SimulationReward::new(
            calculator,
            resolver(),
            ResultCache::new(dir.path()),
            Placement::Random { samples: 3 },
            8,
            -10.0,
        );

        // Pt scores |−2| = 2, Clay has no symbols and scores the penalty.
        let mut first = answered();
        let value = reward.evaluate(&mut first).await.unwrap();
        assert_eq!(value, -4.0);
        assert_eq!(first.reward, Some(-4.0));
        let details = &first.info[SIMULATION_DETAILS_FIELD][0];
        assert_eq!(details["calculated"], 3);
        assert_eq!(details["candidates"]["Platinum"]["slab"], "Pt");

        // Second evaluation is served from disk without relaxing anything.
        let mut second = answered();
        assert_eq!(reward.evaluate(&mut second).await.unwrap(), value);
        assert_eq!(second.info[SIMULATION_DETAILS_FIELD][0]["cached"], 3);
    }

    #[tokio::test]
    async fn test_no_valid_structures_is_penalized() {
        let dir = tempfile::tempdir().unwrap();
        let mut calculator = MockAdsorptionCalculator::new();
        calculator
            .expect_relax_batch()
            .returning(|jobs| Ok(jobs.iter().map(|_| AdsorptionRecord::invalid()).collect()));
        let reward = SimulationReward::new(
            calculator,
            resolver(),
            ResultCache::new(dir.path()),
            Placement::Heuristic { sites: 2 },
            1,
            -10.0,
        );
        let mut state = answered();
        assert_eq!(reward.evaluate(&mut state).await.unwrap(), -10.0);
        assert_eq!(
            state.info[SIMULATION_DETAILS_FIELD][0]["reason"],
            "no valid structures"
        );
    }

    #[tokio::test]
    async fn test_unanswered_state_is_penalized() {
        let dir = tempfile::tempdir().unwrap();
        let reward = SimulationReward::new(
            MockAdsorptionCalculator::new(),
            MockSymbolResolver::new(),
            ResultCache::new(dir.path()),
            Placement::Random { samples: 1 },
            1,
            -7.0,
        );
        let mut state = ReasonerState::new(vec!["CO".into()], "p", "r");
        assert_eq!(reward.evaluate(&mut state).await.unwrap(), -7.0);
    }

    #[tokio::test]
    async fn test_llm_symbol_resolver() {
        let mut client = MockLlmClientTrait::new();
        client
            .expect_complete()
            .withf(|messages, config| {
                messages[0].content.contains("- Platinum\n")
                    && config.system_prompt.as_deref() == Some(SYMBOLS_SYSTEM_PROMPT)
            })
            .returning(|_, _| {
                Ok(CompletionResponse::new(
                    "Platinum: [Pt]\nClay: None",
                    Usage::default(),
                ))
            });
        let resolver = LlmSymbolResolver::new(client, "rew");
        let symbols = resolver
            .resolve(vec!["Platinum".into(), "Clay".into()])
            .await
            .unwrap();
        assert_eq!(symbols, vec![Some(vec!["Pt".to_string()]), None]);
    }
}
