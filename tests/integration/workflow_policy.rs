//! Policy workflow integration tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;

use catalyst_search::search::{Action, ActionSet, CoherentPolicy, Policy, ReasonerPolicy};

use super::common::{root_state, DeadEndPolicy, KeywordEmbedder, ScriptedClient};

fn prior_of(set: &ActionSet, action: &Action) -> f64 {
    set.iter()
        .find(|(a, _)| *a == action)
        .map(|(_, p)| p)
        .expect("action offered")
}

fn total(set: &ActionSet) -> f64 {
    set.priors.iter().sum()
}

fn client() -> Arc<ScriptedClient> {
    Arc::new(ScriptedClient::new(vec![Ok("final_answer: [Pt, Pd, Ni]".into())]))
}

fn embedder() -> KeywordEmbedder {
    KeywordEmbedder {
        table: vec![("high activity", vec![1.0, 0.0])],
        fallback: vec![0.0, 1.0],
    }
}

#[tokio::test]
async fn test_reasoner_policy_apply_queries_only_outside_trials() {
    let client = client();
    let policy = ReasonerPolicy::new(Arc::clone(&client));
    let root = root_state(&["CO"]);

    let set = policy.get_actions(&root).await.unwrap();
    assert!((total(&set) - 1.0).abs() < 1e-9);
    assert!(!set
        .actions
        .iter()
        .any(|a| matches!(a, Action::ChangeRelation(_))));

    let action = Action::AddInclude("low cost".into());
    let trial = policy.apply(&action, &root, true).await.unwrap();
    assert_eq!(client.calls(), 0);
    assert_eq!(trial.answer, None);
    assert_eq!(trial.include_list, vec!["low cost"]);

    let child = policy.apply(&action, &root, false).await.unwrap();
    assert_eq!(client.calls(), 1);
    assert_eq!(child.candidates(), vec!["Pt", "Pd", "Ni"]);

    // Once answered, only relation changes apply until a relation is chosen.
    let next = policy.get_actions(&child).await.unwrap();
    assert!(next
        .iter()
        .filter(|(_, p)| *p > 0.0)
        .all(|(a, _)| matches!(a, Action::ChangeRelation(_))));
}

#[tokio::test]
async fn test_coherent_priors_sum_to_one_and_keep_zeros() {
    let client = client();
    let policy = CoherentPolicy::new(ReasonerPolicy::new(Arc::clone(&client)), embedder(), 0.6);
    let state = root_state(&["CO"]).with_include_list(vec!["low cost".into()]);

    let base = ReasonerPolicy::new(Arc::clone(&client)).get_actions(&state).await.unwrap();
    let set = policy.get_actions(&state).await.unwrap();
    assert!((total(&set) - 1.0).abs() < 1e-9);
    assert_eq!(set.actions, base.actions);
    for (action, prior) in base.iter() {
        if prior == 0.0 {
            assert_eq!(prior_of(&set, action), 0.0, "{action}");
        }
    }
    assert_eq!(prior_of(&set, &Action::AddExclude("low cost".into())), 0.0);
    // Trial successors never reach the chat model.
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_coherent_policy_follows_reward_scale() {
    let client = client();
    let inner = ReasonerPolicy::new(Arc::clone(&client));
    let base = inner.get_actions(&root_state(&["CO"])).await.unwrap();
    let policy = CoherentPolicy::new(inner, embedder(), 0.5);

    let distinct = Action::AddInclude("high activity".into());
    let similar = Action::AddInclude("low cost".into());
    let ratio = |set: &ActionSet, action: &Action| prior_of(set, action) / prior_of(&base, action);

    // First observation: degenerate range, dissimilar trials favoured.
    let mut low = root_state(&["CO"]);
    low.reward = Some(0.0);
    let set = policy.get_actions(&low).await.unwrap();
    assert!(ratio(&set, &distinct) > ratio(&set, &similar));

    // A higher reward widens the range to full scale, similar trials favoured.
    let mut high = root_state(&["CO"]);
    high.reward = Some(5.0);
    let set = policy.get_actions(&high).await.unwrap();
    assert!(ratio(&set, &distinct) < ratio(&set, &similar));
    assert!((total(&set) - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_coherent_policy_dead_end_is_empty() {
    let policy = CoherentPolicy::new(DeadEndPolicy, embedder(), 0.6);
    let set = policy.get_actions(&root_state(&["CO"])).await.unwrap();
    assert!(set.is_empty());
}
