//! Similarity re-weighting of another policy's priors.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{Action, ActionSet, Policy};
use crate::error::{PolicyError, StateError};
use crate::state::ReasonerState;
use crate::traits::EmbeddingClientTrait;

/// Online min-max scaler over observed rewards.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RewardNormalizer {
    range: Option<(f64, f64)>,
}

impl RewardNormalizer {
    /// Widen the fitted range to include `reward`.
    pub fn observe(&mut self, reward: f64) {
        self.range = Some(match self.range {
            Some((min, max)) => (min.min(reward), max.max(reward)),
            None => (reward, reward),
        });
    }

    /// Scale `reward` into `[0, 1]`; 0 while the range is degenerate.
    #[must_use]
    pub fn scale(&self, reward: f64) -> f64 {
        match self.range {
            Some((min, max)) if max > min => ((reward - min) / (max - min)).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

/// Decorator that favours actions whose trial successors resemble the
/// current state when its reward is high, and differ from it when low.
///
/// For each action with positive prior a trial successor is built and its
/// prompt embedded. With `sim` the cosine similarity to the current state
/// and `f` the normalized reward:
///
/// ```text
/// adjusted = sim * f + (1 - sim) * (1 - f)
/// prior'   = softmax(adjusted / temperature) * prior   (renormalized)
/// ```
pub struct CoherentPolicy<P, E>
where
    P: Policy,
    E: EmbeddingClientTrait,
{
    inner: P,
    embedder: E,
    temperature: f64,
    normalizer: Mutex<RewardNormalizer>,
}

impl<P, E> CoherentPolicy<P, E>
where
    P: Policy,
    E: EmbeddingClientTrait,
{
    /// Wrap `inner`, scoring similarity with `embedder`.
    #[must_use]
    pub fn new(inner: P, embedder: E, temperature: f64) -> Self {
        Self {
            inner,
            embedder,
            temperature,
            normalizer: Mutex::new(RewardNormalizer::default()),
        }
    }

    /// Fold `reward` into the normalizer and return its scaled value.
    fn observe_reward(&self, reward: f64) -> f64 {
        let mut normalizer = match self.normalizer.lock() {
            Ok(guard) => guard,
            Err(poison_error) => {
                tracing::warn!("Reward normalizer lock poisoned, recovering");
                poison_error.into_inner()
            }
        };
        normalizer.observe(reward);
        normalizer.scale(reward)
    }

    async fn similarities(
        &self,
        state: &ReasonerState,
        trials: &[ReasonerState],
    ) -> Result<Vec<f64>, PolicyError> {
        // An unanswered state is anchored on its prompt alone.
        let mut texts = match state.similarity_texts() {
            Ok((prompt, answer)) => vec![prompt, answer],
            Err(StateError::MissingAnswer) => vec![state.prompt()?],
            Err(e) => return Err(e.into()),
        };
        let anchors = texts.len();
        for trial in trials {
            texts.push(trial.prompt()?);
        }

        let expected = texts.len();
        let embeddings = self
            .embedder
            .embed(texts)
            .await
            .map_err(|e| PolicyError::Similarity {
                message: e.to_string(),
            })?;
        if embeddings.len() != expected {
            return Err(PolicyError::Similarity {
                message: format!("expected {expected} embeddings, got {}", embeddings.len()),
            });
        }

        let current = sum_vectors(&embeddings[..anchors]);
        Ok(embeddings[anchors..]
            .iter()
            .map(|trial| cosine_similarity(&current, trial))
            .collect())
    }
}

#[async_trait]
impl<P, E> Policy for CoherentPolicy<P, E>
where
    P: Policy,
    E: EmbeddingClientTrait,
{
    async fn get_actions(&self, state: &ReasonerState) -> Result<ActionSet, PolicyError> {
        let base = self.inner.get_actions(state).await?;
        if !base.has_positive() {
            return Ok(ActionSet::default());
        }

        let scaled = self.observe_reward(state.reward.unwrap_or(0.0));
        let live: Vec<usize> = (0..base.len()).filter(|&i| base.priors[i] > 0.0).collect();
        let mut trials = Vec::with_capacity(live.len());
        for &i in &live {
            trials.push(self.inner.apply(&base.actions[i], state, true).await?);
        }
        let similarities = self.similarities(state, &trials).await?;

        let adjusted: Vec<f64> = similarities
            .iter()
            .map(|sim| (sim * scaled + (1.0 - sim) * (1.0 - scaled)) / self.temperature)
            .collect();
        let weights = softmax(&adjusted);

        let mut priors = vec![0.0; base.len()];
        for (&i, weight) in live.iter().zip(weights) {
            priors[i] = weight * base.priors[i];
        }
        tracing::debug!(
            reward_scale = scaled,
            actions = live.len(),
            "Re-weighted priors by similarity"
        );
        Ok(ActionSet::new(base.actions, priors)?.normalized())
    }

    async fn apply(
        &self,
        action: &Action,
        state: &ReasonerState,
        trial: bool,
    ) -> Result<ReasonerState, PolicyError> {
        self.inner.apply(action, state, trial).await
    }
}

fn sum_vectors(vectors: &[Vec<f64>]) -> Vec<f64> {
    let width = vectors.iter().map(Vec::len).max().unwrap_or(0);
    let mut total = vec![0.0; width];
    for vector in vectors {
        for (slot, value) in total.iter_mut().zip(vector) {
            *slot += value;
        }
    }
    total
}

/// Cosine similarity; 0 when either vector has zero norm.
fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
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
    use crate::search::policy::MockPolicy;
    use crate::traits::MockEmbeddingClientTrait;
    use proptest::prelude::*;

    fn answered() -> ReasonerState {
        ReasonerState::new(vec!["CO".into()], "p", "r").with_answer("final_answer: [Pt]")
    }

    fn inner_with(priors: Vec<f64>) -> MockPolicy {
        let actions: Vec<Action> = (0..priors.len())
            .map(|i| Action::AddInclude(format!("property {i}")))
            .collect();
        let mut inner = MockPolicy::new();
        inner
            .expect_get_actions()
            .returning(move |_| ActionSet::new(actions.clone(), priors.clone()));
        inner
            .expect_apply()
            .returning(|action, state, _| Ok(action.transform(state)));
        inner
    }

    // ========================================================================
    // Normalizer
    // ========================================================================

    #[test]
    fn test_normalizer_degenerate_range() {
        let mut normalizer = RewardNormalizer::default();
        assert_eq!(normalizer.scale(3.0), 0.0);
        normalizer.observe(3.0);
        assert_eq!(normalizer.scale(3.0), 0.0);
        normalizer.observe(5.0);
        assert_eq!(normalizer.scale(4.0), 0.5);
        assert_eq!(normalizer.scale(9.0), 1.0);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-12);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-12);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    // ========================================================================
    // Re-weighting
    // ========================================================================

    #[tokio::test]
    async fn test_zero_prior_actions_keep_zero() {
        let mut embedder = MockEmbeddingClientTrait::new();
        // prompt + answer + two live trials
        let (prompt, answer) = answered().similarity_texts().unwrap();
        embedder
            .expect_embed()
            .withf(move |texts| texts.len() == 4 && texts[0] == prompt && texts[1] == answer)
            .returning(|texts| {
                Ok(texts
                    .iter()
                    .enumerate()
                    .map(|(i, _)| vec![1.0, i as f64])
                    .collect())
            });
        let policy = CoherentPolicy::new(inner_with(vec![0.5, 0.0, 0.5]), embedder, 0.6);

        let set = policy.get_actions(&answered()).await.unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.priors[1], 0.0);
        let total: f64 = set.priors.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_all_zero_priors_return_empty() {
        let policy = CoherentPolicy::new(
            inner_with(vec![0.0, 0.0]),
            MockEmbeddingClientTrait::new(),
            0.6,
        );
        let set = policy.get_actions(&answered()).await.unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_high_reward_favours_similar_trials() {
        let mut embedder = MockEmbeddingClientTrait::new();
        embedder.expect_embed().returning(|texts| {
            // anchors point along x; trial 0 is similar, trial 1 orthogonal
            let mut out = vec![vec![1.0, 0.0], vec![1.0, 0.0]];
            out.push(vec![1.0, 0.1]);
            out.push(vec![0.0, 1.0]);
            assert_eq!(texts.len(), 4);
            Ok(out)
        });
        let policy = CoherentPolicy::new(inner_with(vec![0.5, 0.5]), embedder, 0.6);

        // Seed the range so the current reward scales to 1.
        policy.observe_reward(0.0);
        let mut state = answered();
        state.reward = Some(10.0);
        let set = policy.get_actions(&state).await.unwrap();
        assert!(set.priors[0] > set.priors[1]);

        // A low reward now scales to 0 and flips the preference.
        state.reward = Some(0.0);
        let set = policy.get_actions(&state).await.unwrap();
        assert!(set.priors[0] < set.priors[1]);
    }

    #[tokio::test]
    async fn test_unanswered_state_uses_prompt_only() {
        let mut embedder = MockEmbeddingClientTrait::new();
        embedder
            .expect_embed()
            .withf(|texts| texts.len() == 2)
            .returning(|_| Ok(vec![vec![1.0], vec![1.0]]));
        let policy = CoherentPolicy::new(inner_with(vec![1.0]), embedder, 0.6);
        let root = ReasonerState::new(vec!["CO".into()], "p", "r");
        let set = policy.get_actions(&root).await.unwrap();
        assert_eq!(set.priors, vec![1.0]);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_similarity_error() {
        let mut embedder = MockEmbeddingClientTrait::new();
        embedder.expect_embed().returning(|_| {
            Err(LlmError::Network {
                message: "down".into(),
            })
        });
        let policy = CoherentPolicy::new(inner_with(vec![1.0]), embedder, 0.6);
        let err = policy.get_actions(&answered()).await.unwrap_err();
        assert!(matches!(err, PolicyError::Similarity { .. }));
    }

    #[tokio::test]
    async fn test_embedding_count_mismatch() {
        let mut embedder = MockEmbeddingClientTrait::new();
        embedder.expect_embed().returning(|_| Ok(vec![vec![1.0]]));
        let policy = CoherentPolicy::new(inner_with(vec![1.0]), embedder, 0.6);
        let err = policy.get_actions(&answered()).await.unwrap_err();
        assert!(err.to_string().contains("expected 3 embeddings"));
    }

    proptest! {
        #[test]
        fn prop_softmax_sums_to_one(values in proptest::collection::vec(-50.0f64..50.0, 1..20)) {
            let total: f64 = softmax(&values).iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
        }
    }
}
