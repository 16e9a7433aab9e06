//! Policies: which actions to take from a state, and with what priors.
//!
//! A [`Policy`] looks at an answered state and returns an [`ActionSet`], a
//! list of [`Action`]s with non-negative priors. Applying an action yields a
//! fresh successor state; the parent is never modified.
//!
//! - [`ReasonerPolicy`]: fixed catalogue of prompt edits with heuristic priors
//! - [`CoherentPolicy`]: re-weights another policy's priors by embedding
//!   similarity and the reward seen so far

mod coherent;
mod reasoner;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::state::ReasonerState;

pub use coherent::{CoherentPolicy, RewardNormalizer};
pub use reasoner::{
    ReasonerPolicy, DEFAULT_CATALYST_LABELS, DEFAULT_EXCLUDE_PROPERTIES,
    DEFAULT_INCLUDE_PROPERTIES, DEFAULT_RELATIONS,
};

/// An edit to a state's prompt context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Action {
    /// Ask for candidates with a property.
    AddInclude(String),
    /// Ask for candidates without a property.
    AddExclude(String),
    /// Relate the next answer to the current candidates.
    ChangeRelation(String),
    /// Switch the catalyst label.
    ChangeCatalystLabel(String),
    /// Switch between oxide and non-oxide catalysts.
    ToggleOxides,
}

impl Action {
    /// Build the successor of `state` with this action applied.
    ///
    /// The successor is unanswered; the caller decides whether to query it.
    #[must_use]
    pub fn transform(&self, state: &ReasonerState) -> ReasonerState {
        let mut next = state.successor();
        match self {
            Self::AddInclude(property) => next.include_list.push(property.clone()),
            Self::AddExclude(property) => next.exclude_list.push(property.clone()),
            Self::ChangeRelation(relation) => {
                next.relation_to_candidate_list = Some(relation.clone());
            }
            Self::ChangeCatalystLabel(label) => next.catalyst_label.clone_from(label),
            Self::ToggleOxides => next.catalyst_label = toggle_oxides(&next.catalyst_label),
        }
        next
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddInclude(property) => write!(f, "add_include({property})"),
            Self::AddExclude(property) => write!(f, "add_exclude({property})"),
            Self::ChangeRelation(relation) => write!(f, "change_relation({relation})"),
            Self::ChangeCatalystLabel(label) => write!(f, "change_catalyst_label({label})"),
            Self::ToggleOxides => f.write_str("toggle_oxides"),
        }
    }
}

/// Insert `oxide` before the last word of a label, or remove it.
///
/// ```
/// use catalyst_search::search::policy::toggle_oxides;
///
/// assert_eq!(toggle_oxides("bimetallic catalysts"), "bimetallic oxide catalysts");
/// assert_eq!(toggle_oxides("bimetallic oxide catalysts"), "bimetallic catalysts");
/// ```
#[must_use]
pub fn toggle_oxides(label: &str) -> String {
    if label.contains("oxide ") {
        return label.replacen("oxide ", "", 1);
    }
    match label.rsplit_once(' ') {
        Some((head, last)) => format!("{head} oxide {last}"),
        None => format!("oxide {label}"),
    }
}

/// Actions paired with their priors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionSet {
    /// Candidate actions.
    pub actions: Vec<Action>,
    /// Prior per action, same length as `actions`.
    pub priors: Vec<f64>,
}

impl ActionSet {
    /// Pair actions with priors.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidPriors`] if the lengths differ or a prior
    /// is negative or not finite.
    pub fn new(actions: Vec<Action>, priors: Vec<f64>) -> Result<Self, PolicyError> {
        if actions.len() != priors.len() {
            return Err(PolicyError::InvalidPriors {
                reason: format!("{} actions but {} priors", actions.len(), priors.len()),
            });
        }
        if let Some(bad) = priors.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(PolicyError::InvalidPriors {
                reason: format!("prior {bad} is not a finite non-negative number"),
            });
        }
        Ok(Self { actions, priors })
    }

    /// Number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True when there are no actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// True when at least one prior is positive.
    #[must_use]
    pub fn has_positive(&self) -> bool {
        self.priors.iter().any(|p| *p > 0.0)
    }

    /// Scale the priors to sum to 1. Leaves all-zero priors untouched.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let total: f64 = self.priors.iter().sum();
        if total > 0.0 {
            for prior in &mut self.priors {
                *prior /= total;
            }
        }
        self
    }

    /// Iterate over `(action, prior)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Action, f64)> {
        self.actions.iter().zip(self.priors.iter().copied())
    }
}

/// Source of actions and successor states.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Policy: Send + Sync {
    /// Actions available from `state`, with priors.
    ///
    /// An empty set marks a dead end.
    async fn get_actions(&self, state: &ReasonerState) -> Result<ActionSet, PolicyError>;

    /// Materialize the successor of `state` under `action`.
    ///
    /// Trial successors are used for scoring only and are never queried.
    async fn apply(
        &self,
        action: &Action,
        state: &ReasonerState,
        trial: bool,
    ) -> Result<ReasonerState, PolicyError>;
}

#[async_trait]
impl<T: Policy + ?Sized> Policy for Box<T> {
    async fn get_actions(&self, state: &ReasonerState) -> Result<ActionSet, PolicyError> {
        (**self).get_actions(state).await
    }

    async fn apply(
        &self,
        action: &Action,
        state: &ReasonerState,
        trial: bool,
    ) -> Result<ReasonerState, PolicyError> {
        (**self).apply(action, state, trial).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn answered() -> ReasonerState {
        ReasonerState::new(vec!["CO".into()], "p", "r")
            .with_catalyst_label("metallic catalysts")
            .with_answer("final_answer: [Pt, Cu]")
    }

    #[test_case("metallic catalysts", "metallic oxide catalysts" ; "adds before last word")]
    #[test_case("metallic oxide catalysts", "metallic catalysts" ; "removes")]
    #[test_case("catalysts", "oxide catalysts" ; "single word")]
    fn test_toggle_oxides(label: &str, expected: &str) {
        assert_eq!(toggle_oxides(label), expected);
    }

    #[test]
    fn test_transform_builds_independent_successor() {
        let parent = answered();
        let child = Action::AddInclude("low cost".into()).transform(&parent);
        assert_eq!(child.include_list, vec!["low cost"]);
        assert_eq!(child.prev_candidate_list, vec!["Pt", "Cu"]);
        assert!(child.answer.is_none());
        assert!(parent.include_list.is_empty());

        let child = Action::ChangeRelation("similar to".into()).transform(&parent);
        assert_eq!(child.relation_to_candidate_list.as_deref(), Some("similar to"));

        let child = Action::ToggleOxides.transform(&parent);
        assert_eq!(child.catalyst_label, "metallic oxide catalysts");
    }

    #[test]
    fn test_action_display_and_serde() {
        let action = Action::AddExclude("high toxicity".into());
        assert_eq!(action.to_string(), "add_exclude(high toxicity)");
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["kind"], "add_exclude");
        let back: Action = serde_json::from_value(value).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn test_action_set_validation() {
        assert!(ActionSet::new(vec![Action::ToggleOxides], vec![]).is_err());
        assert!(ActionSet::new(vec![Action::ToggleOxides], vec![-0.1]).is_err());
        assert!(ActionSet::new(vec![Action::ToggleOxides], vec![f64::NAN]).is_err());
        let set = ActionSet::new(vec![Action::ToggleOxides], vec![0.0]).unwrap();
        assert!(!set.has_positive());
        assert_eq!(set.clone().normalized(), set);
    }

    #[test]
    fn test_action_set_normalized() {
        let set = ActionSet::new(
            vec![Action::ToggleOxides, Action::AddInclude("x".into())],
            vec![1.0, 3.0],
        )
        .unwrap()
        .normalized();
        assert_eq!(set.priors, vec![0.25, 0.75]);
        assert_eq!(set.len(), 2);
    }
}
