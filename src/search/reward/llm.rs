//! Reward estimated by the language model.

use async_trait::async_trait;
use serde_json::json;

use super::aggregate::{aggregate_energy_lists, Aggregate};
use super::RewardFunction;
use crate::error::RewardError;
use crate::state::ReasonerState;
use crate::traits::LlmClientTrait;

/// Info field holding the reward value.
pub const LLM_REWARD_FIELD: &str = "llm-reward";

/// Info field holding failed attempts.
pub const LLM_REWARD_FAILURE_FIELD: &str = "llm-reward-failure";

/// Asks the reward model for adsorption energies and aggregates them.
///
/// An attempt fails when the query or parse fails, or when the aggregate is
/// missing or above `reward_limit`. A state whose answer names no candidates
/// is regenerated with the prediction model before the next attempt. After
/// `max_attempts` failures the state is scored `penalty_value`.
pub struct LlmReward<C>
where
    C: LlmClientTrait,
{
    client: C,
    max_attempts: u32,
    reward_limit: f64,
    penalty_value: f64,
}

/// Why an attempt produced no reward.
enum Failure {
    /// The answer names no candidates.
    Answer(String),
    /// The energies could not be obtained or were out of range.
    Energies(String),
}

impl<C> LlmReward<C>
where
    C: LlmClientTrait,
{
    /// Create an LLM reward.
    #[must_use]
    pub const fn new(client: C, max_attempts: u32, reward_limit: f64, penalty_value: f64) -> Self {
        Self {
            client,
            max_attempts,
            reward_limit,
            penalty_value,
        }
    }

    async fn attempt(&self, state: &mut ReasonerState) -> Result<f64, Failure> {
        if state.candidates().is_empty() {
            let reason = if state.answer.is_some() {
                "answer has no candidates"
            } else {
                "state has no answer"
            };
            return Err(Failure::Answer(reason.to_string()));
        }
        let lists = state
            .query_adsorption_energy_list(&self.client)
            .await
            .map_err(|e| Failure::Energies(e.to_string()))?;
        match aggregate_energy_lists(&lists, &state.ads_preferences) {
            Aggregate::Value(value) if value <= self.reward_limit => Ok(value),
            Aggregate::Value(value) => Err(Failure::Energies(format!(
                "reward {value} exceeds limit {}",
                self.reward_limit
            ))),
            Aggregate::NoValidData => Err(Failure::Energies("no usable energies".to_string())),
            Aggregate::Malformed(reason) => Err(Failure::Energies(reason)),
        }
    }
}

#[async_trait]
impl<C> RewardFunction for LlmReward<C>
where
    C: LlmClientTrait,
{
    async fn evaluate(&self, state: &mut ReasonerState) -> Result<f64, RewardError> {
        let mut errors = Vec::new();
        for attempt in 1..=self.max_attempts {
            match self.attempt(state).await {
                Ok(value) => {
                    state.set_reward(value, LLM_REWARD_FIELD);
                    return Ok(value);
                }
                Err(Failure::Energies(error)) => {
                    tracing::warn!(attempt, error = %error, "LLM reward attempt failed");
                    errors.push(error);
                }
                Err(Failure::Answer(error)) => {
                    tracing::warn!(attempt, error = %error, "Unusable answer, regenerating");
                    errors.push(error);
                    if attempt < self.max_attempts {
                        if let Err(e) = state.query(&self.client).await {
                            tracing::warn!(attempt, error = %e, "Answer regeneration failed");
                        }
                    }
                }
            }
        }

        state.record_info(
            LLM_REWARD_FAILURE_FIELD,
            json!({
                "attempts": self.max_attempts,
                "errors": errors,
                "penalty": self.penalty_value,
            }),
        );
        state.set_reward(self.penalty_value, LLM_REWARD_FIELD);
        Ok(self.penalty_value)
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
    use crate::error::LlmError;
    use crate::traits::{CompletionConfig, CompletionResponse, MockLlmClientTrait, Usage};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn answered() -> ReasonerState {
        ReasonerState::new(vec!["CO".into()], "p", "r").with_answer("final_answer: [Pt, Cu]")
    }

    fn reply(text: &'static str) -> Result<CompletionResponse, LlmError> {
        Ok(CompletionResponse::new(text, Usage::default()))
    }

    #[tokio::test]
    async fn test_success_sets_reward() {
        let mut client = MockLlmClientTrait::new();
        client
            .expect_complete()
            .times(1)
            .returning(|_, _| reply("final_answer: [-1.0, -3.0]"));
        let reward = LlmReward::new(client, 3, 10.0, -10.0);

        let mut state = answered();
        let value = reward.evaluate(&mut state).await.unwrap();
        assert_eq!(value, 2.0);
        assert_eq!(state.reward, Some(2.0));
        assert!(!state.info.contains_key(LLM_REWARD_FAILURE_FIELD));
    }

    #[tokio::test]
    async fn test_exhausted_attempts_return_penalty() {
        let mut client = MockLlmClientTrait::new();
        client
            .expect_complete()
            .times(3)
            .returning(|_, _| Err(LlmError::Timeout { timeout_ms: 10 }));
        let reward = LlmReward::new(client, 3, 10.0, -10.0);

        let mut state = answered();
        let value = reward.evaluate(&mut state).await.unwrap();
        assert_eq!(value, -10.0);
        assert_eq!(state.reward, Some(-10.0));
        let failure = &state.info[LLM_REWARD_FAILURE_FIELD][0];
        assert_eq!(failure["attempts"], 3);
        assert_eq!(failure["errors"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_retries_until_under_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut client = MockLlmClientTrait::new();
        client.expect_complete().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                reply("final_answer: [50.0, 70.0]")
            } else {
                reply("final_answer: [1.0, 1.0]")
            }
        });
        let reward = LlmReward::new(client, 3, 10.0, -10.0);

        let mut state = answered();
        let value = reward.evaluate(&mut state).await.unwrap();
        assert_eq!(value, 1.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// Answer with `generation` on the prediction model, `energies` otherwise.
    fn by_model(
        config: &CompletionConfig,
        generation: &'static str,
        energies: &'static str,
    ) -> Result<CompletionResponse, LlmError> {
        if config.model.as_deref() == Some("p") {
            reply(generation)
        } else {
            reply(energies)
        }
    }

    #[tokio::test]
    async fn test_unparsable_answer_is_regenerated() {
        let mut client = MockLlmClientTrait::new();
        client
            .expect_complete()
            .times(2)
            .returning(|_, config| by_model(&config, "final_answer: [Pt, Cu]", "final_answer: [-1.0, -3.0]"));
        let reward = LlmReward::new(client, 3, 10.0, -10.0);

        let mut state = ReasonerState::new(vec!["CO".into()], "p", "r").with_answer("I am not sure.");
        let value = reward.evaluate(&mut state).await.unwrap();
        assert_eq!(value, 2.0);
        assert_eq!(state.answer.as_deref(), Some("final_answer: [Pt, Cu]"));
        assert_eq!(state.num_queries, 2);
        assert!(!state.info.contains_key(LLM_REWARD_FAILURE_FIELD));
    }

    #[tokio::test]
    async fn test_unanswered_state_is_generated_then_scored() {
        let mut client = MockLlmClientTrait::new();
        client
            .expect_complete()
            .returning(|_, config| by_model(&config, "final_answer: [Ni]", "final_answer: [-0.5]"));
        let reward = LlmReward::new(client, 2, 10.0, -5.0);
        let mut state = ReasonerState::new(vec!["CO".into()], "p", "r");
        assert_eq!(reward.evaluate(&mut state).await.unwrap(), 0.5);
        assert_eq!(state.candidates(), vec!["Ni"]);
    }

    #[tokio::test]
    async fn test_answer_never_usable_is_penalized() {
        let mut client = MockLlmClientTrait::new();
        // Two attempts, one regeneration between them.
        client
            .expect_complete()
            .times(1)
            .returning(|_, _| reply("still no list"));
        let reward = LlmReward::new(client, 2, 10.0, -5.0);
        let mut state = ReasonerState::new(vec!["CO".into()], "p", "r").with_answer("no list");
        assert_eq!(reward.evaluate(&mut state).await.unwrap(), -5.0);
        let failure = &state.info[LLM_REWARD_FAILURE_FIELD][0];
        assert_eq!(failure["errors"][0], "answer has no candidates");
    }
}
