//! Search state.
//!
//! A [`ReasonerState`] is one node of a search tree: the prompt context that
//! produced an answer, the answer itself once queried, and bookkeeping about
//! how it was scored. States are plain values. Transitions always produce a
//! fresh, independent copy, so sibling branches never share mutable data.
//!
//! # Example
//!
//! ```
//! use catalyst_search::state::ReasonerState;
//!
//! let root = ReasonerState::new(vec!["CO".into()], "gpt-4", "gpt-4")
//!     .with_catalyst_label("bimetallic catalysts");
//! assert!(root.candidates().is_empty());
//! assert!(root.prompt().unwrap().contains("bimetallic catalysts"));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StateError;
use crate::llm::complete_many;
use crate::prompts::{
    adsorption_energy_list_prompt, generation_prompt, parse_answer, parse_energy_list,
    GenerationPrompt, DEFAULT_GENERATION_TEMPLATE, REWARD_SYSTEM_PROMPT,
};
use crate::traits::{CompletionConfig, LlmClientTrait, Message};

/// Default catalyst label.
pub const DEFAULT_CATALYST_LABEL: &str = "catalysts";

/// Default number of candidates requested per answer.
pub const DEFAULT_NUM_ANSWERS: usize = 3;

fn default_catalyst_label() -> String {
    DEFAULT_CATALYST_LABEL.to_string()
}

const fn default_num_answers() -> usize {
    DEFAULT_NUM_ANSWERS
}

fn default_template() -> String {
    DEFAULT_GENERATION_TEMPLATE.to_string()
}

/// One node of the catalyst search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonerState {
    /// Generation prompt template.
    #[serde(default = "default_template")]
    pub template: String,
    /// Optional template for reward queries.
    #[serde(default)]
    pub reward_template: Option<String>,
    /// Target adsorbates.
    pub ads_symbols: Vec<String>,
    /// Exponent applied to each adsorbate's energy during aggregation.
    #[serde(default)]
    pub ads_preferences: Vec<f64>,
    /// Catalyst label, e.g. "bimetallic catalysts".
    #[serde(default = "default_catalyst_label")]
    pub catalyst_label: String,
    /// Number of candidates requested.
    #[serde(default = "default_num_answers")]
    pub num_answers: usize,
    /// Candidates proposed by the parent state.
    #[serde(default)]
    pub prev_candidate_list: Vec<String>,
    /// How the answer should relate to the previous candidates.
    #[serde(default)]
    pub relation_to_candidate_list: Option<String>,
    /// Properties the candidates should have.
    #[serde(default)]
    pub include_list: Vec<String>,
    /// Properties the candidates should not have.
    #[serde(default)]
    pub exclude_list: Vec<String>,
    /// Model answer, unset until queried.
    #[serde(default)]
    pub answer: Option<String>,
    /// Model requests issued on behalf of this state.
    #[serde(default)]
    pub num_queries: u32,
    /// Model used for generation.
    pub prediction_model: String,
    /// Model used for reward queries.
    pub reward_model: String,
    /// Reward, once evaluated.
    #[serde(default)]
    pub reward: Option<f64>,
    /// Diagnostic records keyed by field; each field holds a list of entries.
    #[serde(default)]
    pub info: Map<String, Value>,
}

impl ReasonerState {
    /// Create a root state with default template and label.
    #[must_use]
    pub fn new(
        ads_symbols: Vec<String>,
        prediction_model: impl Into<String>,
        reward_model: impl Into<String>,
    ) -> Self {
        let ads_preferences = vec![1.0; ads_symbols.len()];
        Self {
            template: default_template(),
            reward_template: None,
            ads_symbols,
            ads_preferences,
            catalyst_label: default_catalyst_label(),
            num_answers: DEFAULT_NUM_ANSWERS,
            prev_candidate_list: Vec::new(),
            relation_to_candidate_list: None,
            include_list: Vec::new(),
            exclude_list: Vec::new(),
            answer: None,
            num_queries: 0,
            prediction_model: prediction_model.into(),
            reward_model: reward_model.into(),
            reward: None,
            info: Map::new(),
        }
    }

    /// Set the generation template.
    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Set the reward template.
    #[must_use]
    pub fn with_reward_template(mut self, template: impl Into<String>) -> Self {
        self.reward_template = Some(template.into());
        self
    }

    /// Set per-adsorbate preferences.
    #[must_use]
    pub fn with_ads_preferences(mut self, preferences: Vec<f64>) -> Self {
        self.ads_preferences = preferences;
        self
    }

    /// Set the catalyst label.
    #[must_use]
    pub fn with_catalyst_label(mut self, label: impl Into<String>) -> Self {
        self.catalyst_label = label.into();
        self
    }

    /// Set the number of requested candidates.
    #[must_use]
    pub const fn with_num_answers(mut self, num_answers: usize) -> Self {
        self.num_answers = num_answers;
        self
    }

    /// Set the include list.
    #[must_use]
    pub fn with_include_list(mut self, include_list: Vec<String>) -> Self {
        self.include_list = include_list;
        self
    }

    /// Set the exclude list.
    #[must_use]
    pub fn with_exclude_list(mut self, exclude_list: Vec<String>) -> Self {
        self.exclude_list = exclude_list;
        self
    }

    /// Set the answer directly.
    #[must_use]
    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = Some(answer.into());
        self
    }

    /// The generation prompt for this state.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::MissingRelation`] when previous candidates exist
    /// without a relation phrase.
    pub fn prompt(&self) -> Result<String, StateError> {
        generation_prompt(&GenerationPrompt {
            template: &self.template,
            catalyst_label: &self.catalyst_label,
            num_answers: self.num_answers,
            candidate_list: &self.prev_candidate_list,
            relation_to_candidate_list: self.relation_to_candidate_list.as_deref(),
            include_list: &self.include_list,
            exclude_list: &self.exclude_list,
            adsorbates: &self.ads_symbols,
        })
    }

    /// Candidates parsed from the answer; empty until answered or when unparsable.
    #[must_use]
    pub fn candidates(&self) -> Vec<String> {
        self.answer
            .as_deref()
            .and_then(|answer| parse_answer(answer).ok())
            .unwrap_or_default()
    }

    /// Send a prompt and count the query against this state.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Query`] if the client fails.
    pub async fn send_query(
        &mut self,
        client: &dyn LlmClientTrait,
        prompt: String,
        config: CompletionConfig,
    ) -> Result<String, StateError> {
        tracing::debug!(prompt = %prompt, "Sending state query");
        let response = client.complete(vec![Message::user(prompt)], config).await?;
        self.num_queries += 1;
        tracing::debug!(answer = %response.content, "State query answered");
        Ok(response.content)
    }

    /// Generate the answer for this state with the prediction model.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] if the prompt cannot be built or the query fails.
    pub async fn query(&mut self, client: &dyn LlmClientTrait) -> Result<(), StateError> {
        let prompt = self.prompt()?;
        let config = CompletionConfig::new().with_model(self.prediction_model.clone());
        let answer = self.send_query(client, prompt, config).await?;
        self.answer = Some(answer);
        Ok(())
    }

    /// Ask the reward model for adsorption energies of every candidate.
    ///
    /// One query per adsorbate, issued concurrently. Returns the absolute
    /// energies per adsorbate, in adsorbate order.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::MissingAnswer`] before the state is answered,
    /// [`StateError::Parse`] if the answer has no candidates or an energy list
    /// does not parse, and [`StateError::Query`] if a request fails.
    pub async fn query_adsorption_energy_list(
        &mut self,
        client: &dyn LlmClientTrait,
    ) -> Result<Vec<Vec<f64>>, StateError> {
        let answer = self.answer.as_deref().ok_or(StateError::MissingAnswer)?;
        let candidates = parse_answer(answer)?;
        if candidates.is_empty() {
            return Err(StateError::Parse {
                message: "answer has no candidates".to_string(),
            });
        }

        let config = CompletionConfig::new()
            .with_model(self.reward_model.clone())
            .with_system_prompt(REWARD_SYSTEM_PROMPT);
        let requests = self
            .ads_symbols
            .iter()
            .map(|adsorbate| {
                let prompt = adsorption_energy_list_prompt(
                    adsorbate,
                    &candidates,
                    self.reward_template.as_deref(),
                );
                (vec![Message::user(prompt)], config.clone())
            })
            .collect();
        let responses = complete_many(client, requests).await?;
        self.num_queries = self
            .num_queries
            .saturating_add(u32::try_from(responses.len()).unwrap_or(u32::MAX));

        responses
            .iter()
            .map(|response| parse_energy_list(&response.content))
            .collect()
    }

    /// Set the reward and record it under `info_field`.
    pub fn set_reward(&mut self, value: f64, info_field: &str) {
        self.reward = Some(value);
        self.record_info(info_field, serde_json::json!({ "value": value }));
    }

    /// Append an entry to the `field` list of the info mapping.
    pub fn record_info(&mut self, field: &str, value: Value) {
        match self.info.get_mut(field) {
            Some(Value::Array(entries)) => entries.push(value),
            Some(existing) => {
                let previous = existing.take();
                *existing = Value::Array(vec![previous, value]);
            }
            None => {
                self.info.insert(field.to_string(), Value::Array(vec![value]));
            }
        }
    }

    /// The next state: current candidates become the previous candidates,
    /// while the answer, counters, reward and info are cleared.
    #[must_use]
    pub fn successor(&self) -> Self {
        Self {
            prev_candidate_list: self.candidates(),
            answer: None,
            num_queries: 0,
            reward: None,
            info: Map::new(),
            ..self.clone()
        }
    }

    /// The prompt and answer used for similarity scoring.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::MissingAnswer`] before the state is answered.
    pub fn similarity_texts(&self) -> Result<(String, String), StateError> {
        let answer = self.answer.clone().ok_or(StateError::MissingAnswer)?;
        Ok((self.prompt()?, answer))
    }

    /// Flat mapping of the state's attributes.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Deserialize`] if a value cannot be represented (non-finite reward).
    pub fn to_dict(&self) -> Result<Value, StateError> {
        serde_json::to_value(self).map_err(|e| StateError::Deserialize {
            message: e.to_string(),
        })
    }

    /// Rebuild a state from [`ReasonerState::to_dict`] output.
    ///
    /// Missing preferences default to 1.0 per adsorbate.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Deserialize`] if required fields are missing or
    /// the preferences do not match the adsorbates.
    pub fn from_dict(value: &Value) -> Result<Self, StateError> {
        let mut state: Self =
            Self::deserialize(value).map_err(|e| StateError::Deserialize {
                message: e.to_string(),
            })?;
        if state.ads_preferences.is_empty() {
            state.ads_preferences = vec![1.0; state.ads_symbols.len()];
        }
        if state.ads_preferences.len() != state.ads_symbols.len() {
            return Err(StateError::Deserialize {
                message: format!(
                    "{} preferences for {} adsorbates",
                    state.ads_preferences.len(),
                    state.ads_symbols.len()
                ),
            });
        }
        Ok(state)
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
    use crate::traits::{CompletionResponse, MockLlmClientTrait, Usage};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn root() -> ReasonerState {
        ReasonerState::new(vec!["CO".into(), "H2O".into()], "pred", "rew")
    }

    #[test]
    fn test_new_defaults_preferences() {
        let state = root();
        assert_eq!(state.ads_preferences, vec![1.0, 1.0]);
        assert_eq!(state.catalyst_label, DEFAULT_CATALYST_LABEL);
        assert_eq!(state.num_answers, DEFAULT_NUM_ANSWERS);
        assert!(state.candidates().is_empty());
    }

    #[test]
    fn test_candidates_follow_answer() {
        let state = root().with_answer("final_answer: [Pt, Cu]");
        assert_eq!(state.candidates(), vec!["Pt", "Cu"]);
        let state = root().with_answer("I do not know");
        assert!(state.candidates().is_empty());
    }

    #[tokio::test]
    async fn test_query_sets_answer_and_counts() {
        let mut client = MockLlmClientTrait::new();
        client
            .expect_complete()
            .withf(|messages, config| {
                messages[0].content.contains("adsorption of CO, H2O")
                    && config.model.as_deref() == Some("pred")
            })
            .times(1)
            .returning(|_, _| {
                Ok(CompletionResponse::new(
                    "final_answer: [Pt, Pd, Ni]",
                    Usage::default(),
                ))
            });

        let mut state = root();
        state.query(&client).await.unwrap();
        assert_eq!(state.num_queries, 1);
        assert_eq!(state.candidates(), vec!["Pt", "Pd", "Ni"]);
    }

    #[tokio::test]
    async fn test_query_failure_keeps_answer_unset() {
        let mut client = MockLlmClientTrait::new();
        client
            .expect_complete()
            .returning(|_, _| Err(LlmError::Timeout { timeout_ms: 5 }));

        let mut state = root();
        let err = state.query(&client).await.unwrap_err();
        assert!(matches!(err, StateError::Query { .. }));
        assert!(state.answer.is_none());
        assert_eq!(state.num_queries, 0);
    }

    #[tokio::test]
    async fn test_query_adsorption_energy_list() {
        let mut client = MockLlmClientTrait::new();
        client
            .expect_complete()
            .withf(|_, config| {
                config.model.as_deref() == Some("rew") && config.system_prompt.is_some()
            })
            .times(2)
            .returning(|messages, _| {
                let text = if messages[0].content.contains("adsorbate CO ") {
                    "final_answer: [-1.0 eV, -2.0 eV]"
                } else {
                    "final_answer: [0.5, 0.25]"
                };
                Ok(CompletionResponse::new(text, Usage::default()))
            });

        let mut state = root().with_answer("final_answer: [Pt, Cu]");
        let energies = state.query_adsorption_energy_list(&client).await.unwrap();
        assert_eq!(energies, vec![vec![1.0, 2.0], vec![0.5, 0.25]]);
        assert_eq!(state.num_queries, 2);
    }

    #[tokio::test]
    async fn test_query_adsorption_energy_list_requires_answer() {
        let client = MockLlmClientTrait::new();
        let mut state = root();
        let err = state
            .query_adsorption_energy_list(&client)
            .await
            .unwrap_err();
        assert_eq!(err, StateError::MissingAnswer);
    }

    #[test]
    fn test_set_reward_records_info() {
        let mut state = root();
        state.set_reward(2.5, "llm-reward");
        state.set_reward(3.0, "llm-reward");
        assert_eq!(state.reward, Some(3.0));
        assert_eq!(
            state.info["llm-reward"],
            json!([{"value": 2.5}, {"value": 3.0}])
        );
    }

    #[test]
    fn test_successor_is_independent() {
        let mut parent = root()
            .with_include_list(vec!["low cost".into()])
            .with_answer("final_answer: [Pt, Cu]");
        parent.relation_to_candidate_list = Some("similar to".into());
        parent.set_reward(1.0, "llm-reward");
        parent.num_queries = 4;

        let mut child = parent.successor();
        assert_eq!(child.prev_candidate_list, vec!["Pt", "Cu"]);
        assert!(child.answer.is_none());
        assert_eq!(child.num_queries, 0);
        assert!(child.reward.is_none());
        assert!(child.info.is_empty());
        assert_eq!(child.include_list, parent.include_list);

        child.include_list.push("novelty".into());
        child.record_info("note", json!("child only"));
        assert_eq!(parent.include_list, vec!["low cost"]);
        assert!(!parent.info.contains_key("note"));
    }

    #[test]
    fn test_successor_prompt_mentions_previous_candidates() {
        let mut parent = root().with_answer("final_answer: [Pt, Cu]");
        parent.relation_to_candidate_list = Some("include elements similar to".into());
        let child = parent.successor();
        assert!(child
            .prompt()
            .unwrap()
            .contains("include elements similar to Pt, Cu "));
    }

    #[test]
    fn test_dict_round_trip() {
        let mut state = root().with_answer("final_answer: [Pt]");
        state.set_reward(1.25, "llm-reward");
        let dict = state.to_dict().unwrap();
        assert_eq!(dict["answer"], "final_answer: [Pt]");
        let restored = ReasonerState::from_dict(&dict).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_from_dict_defaults_and_validation() {
        let restored = ReasonerState::from_dict(&json!({
            "ads_symbols": ["CO"],
            "prediction_model": "p",
            "reward_model": "r"
        }))
        .unwrap();
        assert_eq!(restored.ads_preferences, vec![1.0]);
        assert_eq!(restored.template, DEFAULT_GENERATION_TEMPLATE);

        let err = ReasonerState::from_dict(&json!({
            "ads_symbols": ["CO"],
            "ads_preferences": [1.0, -1.0],
            "prediction_model": "p",
            "reward_model": "r"
        }))
        .unwrap_err();
        assert!(matches!(err, StateError::Deserialize { .. }));

        assert!(ReasonerState::from_dict(&json!({"answer": "x"})).is_err());
    }

    #[test]
    fn test_similarity_texts() {
        assert_eq!(root().similarity_texts(), Err(StateError::MissingAnswer));
        let state = root().with_answer("final_answer: [Pt]");
        let (prompt, answer) = state.similarity_texts().unwrap();
        assert_eq!(prompt, state.prompt().unwrap());
        assert_eq!(answer, "final_answer: [Pt]");
    }
}
