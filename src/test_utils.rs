//! Test utilities and mock factories.
//!
//! Shared fixtures for the search modules:
//! - Root states
//! - Mock clients, policies and reward functions
//! - Fixed clocks
//!
//! Only compiled for tests (`#[cfg(test)]`).

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{TimeZone, Utc};

use crate::search::policy::{Action, ActionSet, MockPolicy};
use crate::search::reward::MockRewardFunction;
use crate::state::ReasonerState;
use crate::traits::{CompletionResponse, MockLlmClientTrait, MockTimeProvider, Usage};

/// Root state for a single `CO` adsorbate.
#[must_use]
pub fn root_state() -> ReasonerState {
    ReasonerState::new(vec!["CO".into()], "p", "r")
}

/// The `i`-th synthetic include action.
#[must_use]
pub fn property(i: usize) -> Action {
    Action::AddInclude(format!("property {i}"))
}

/// Index of the synthetic property last added to `state`.
#[must_use]
pub fn last_property(state: &ReasonerState) -> usize {
    state
        .include_list
        .last()
        .and_then(|p| p.trim_start_matches("property ").parse().ok())
        .expect("state has a synthetic property")
}

/// Mock client answering every completion with `response`.
///
/// # Example
///
/// ```ignore
/// let client = mock_llm_success("final_answer: [Pt, Pd]");
/// state.query(&client).await?;
/// ```
#[must_use]
pub fn mock_llm_success(response: impl Into<String>) -> MockLlmClientTrait {
    let response = response.into();
    let mut mock = MockLlmClientTrait::new();
    mock.expect_complete()
        .returning(move |_msgs, _config| Ok(CompletionResponse::new(response.clone(), Usage::new(10, 20))));
    mock
}

/// Policy offering one synthetic include action per prior.
///
/// Applying an action only transforms the state; nothing is queried.
#[must_use]
pub fn policy_with(priors: Vec<f64>) -> MockPolicy {
    let actions: Vec<Action> = (0..priors.len()).map(property).collect();
    let mut policy = MockPolicy::new();
    policy
        .expect_get_actions()
        .returning(move |_| ActionSet::new(actions.clone(), priors.clone()));
    policy
        .expect_apply()
        .returning(|action, state, _| Ok(action.transform(state)));
    policy
}

/// Reward function scoring every state with `value`.
#[must_use]
pub fn constant_reward(value: f64) -> MockRewardFunction {
    let mut reward = MockRewardFunction::new();
    reward.expect_evaluate().returning(move |state| {
        state.reward = Some(value);
        Ok(value)
    });
    reward
}

/// Reward read from the last synthetic property of the state.
#[must_use]
pub fn reward_by_property(values: Vec<f64>) -> MockRewardFunction {
    let mut reward = MockRewardFunction::new();
    reward.expect_evaluate().returning(move |state| {
        let value = values[last_property(state)];
        state.reward = Some(value);
        Ok(value)
    });
    reward
}

/// Clock fixed at `secs` seconds after the epoch.
#[must_use]
pub fn fixed_time(secs: i64) -> MockTimeProvider {
    let mut mock = MockTimeProvider::new();
    mock.expect_now()
        .returning(move || Utc.timestamp_opt(secs, 0).unwrap());
    mock
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::policy::Policy;
    use crate::search::reward::RewardFunction;
    use crate::traits::{LlmClientTrait, TimeProvider};

    #[tokio::test]
    async fn test_mock_llm_success() {
        let mock = mock_llm_success("hello");
        let response = mock.complete(vec![], Default::default()).await.unwrap();
        assert_eq!(response.content, "hello");
    }

    #[tokio::test]
    async fn test_policy_and_reward_factories() {
        let policy = policy_with(vec![0.5, 0.5]);
        let set = policy.get_actions(&root_state()).await.unwrap();
        assert_eq!(set.actions, vec![property(0), property(1)]);

        let mut child = policy.apply(&property(1), &root_state(), false).await.unwrap();
        assert_eq!(last_property(&child), 1);
        let value = reward_by_property(vec![0.0, 4.0]).evaluate(&mut child).await.unwrap();
        assert!((value - 4.0).abs() < f64::EPSILON);
        assert_eq!(child.reward, Some(4.0));
    }

    #[test]
    fn test_fixed_time() {
        assert_eq!(fixed_time(1_000).now().timestamp(), 1_000);
    }
}
