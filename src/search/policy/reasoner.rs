//! Catalogue policy.

use async_trait::async_trait;

use super::{Action, ActionSet, Policy};
use crate::error::PolicyError;
use crate::state::ReasonerState;
use crate::traits::LlmClientTrait;

/// Properties a successor may ask candidates to have.
pub const DEFAULT_INCLUDE_PROPERTIES: &[&str] = &[
    "high activity",
    "high selectivity",
    "low cost",
    "novelty",
    "low toxicity",
    "high binding energy",
    "high conversion",
    "high availability",
];

/// Properties a successor may ask candidates to avoid.
pub const DEFAULT_EXCLUDE_PROPERTIES: &[&str] = &[
    "low activity",
    "low stability",
    "low selectivity",
    "low cost",
    "high toxicity",
    "low dispersion",
    "low porosity",
    "high scarcity",
    "low conversion",
];

/// Relations between the next answer and the current candidates.
pub const DEFAULT_RELATIONS: &[&str] = &[
    "include elements that are different from",
    "include elements similar to",
    "introduce new elements to",
    "include elements from",
    "are similar to",
];

/// Catalyst labels to switch between.
pub const DEFAULT_CATALYST_LABELS: &[&str] = &[
    "metallic catalysts",
    "monometallic catalysts",
    "bimetallic catalysts",
    "trimetallic catalysts",
];

const INCLUDE_WEIGHT: f64 = 0.25;
const EXCLUDE_WEIGHT: f64 = 0.25;
const RELATION_WEIGHT: f64 = 0.2;
const LABEL_WEIGHT: f64 = 0.2;
const OXIDE_WEIGHT: f64 = 0.1;

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

/// Policy over a fixed catalogue of prompt edits.
///
/// Each action kind carries a fixed weight, split evenly among the
/// applicable actions of that kind:
///
/// | kind | weight |
/// |---|---|
/// | include | 0.25 |
/// | exclude | 0.25 |
/// | relation | 0.2 |
/// | catalyst label | 0.2 |
/// | oxide toggle | 0.1 |
///
/// Inapplicable actions keep prior 0. A state whose candidates have no
/// relation yet only admits relation changes, since its successors could not
/// otherwise be prompted.
pub struct ReasonerPolicy<C>
where
    C: LlmClientTrait,
{
    client: C,
    include_properties: Vec<String>,
    exclude_properties: Vec<String>,
    relations: Vec<String>,
    catalyst_labels: Vec<String>,
    try_oxides: bool,
}

impl<C> ReasonerPolicy<C>
where
    C: LlmClientTrait,
{
    /// Create a policy with the default catalogue and oxide toggling on.
    #[must_use]
    pub fn new(client: C) -> Self {
        Self {
            client,
            include_properties: owned(DEFAULT_INCLUDE_PROPERTIES),
            exclude_properties: owned(DEFAULT_EXCLUDE_PROPERTIES),
            relations: owned(DEFAULT_RELATIONS),
            catalyst_labels: owned(DEFAULT_CATALYST_LABELS),
            try_oxides: true,
        }
    }

    /// Replace the include catalogue.
    #[must_use]
    pub fn with_include_properties(mut self, properties: Vec<String>) -> Self {
        self.include_properties = properties;
        self
    }

    /// Replace the exclude catalogue.
    #[must_use]
    pub fn with_exclude_properties(mut self, properties: Vec<String>) -> Self {
        self.exclude_properties = properties;
        self
    }

    /// Replace the relation catalogue.
    #[must_use]
    pub fn with_relations(mut self, relations: Vec<String>) -> Self {
        self.relations = relations;
        self
    }

    /// Replace the catalyst label catalogue.
    #[must_use]
    pub fn with_catalyst_labels(mut self, labels: Vec<String>) -> Self {
        self.catalyst_labels = labels;
        self
    }

    /// Enable or disable the oxide toggle.
    #[must_use]
    pub const fn with_try_oxides(mut self, try_oxides: bool) -> Self {
        self.try_oxides = try_oxides;
        self
    }

    /// Every catalogue action for `state`, with its prior.
    fn catalogue(&self, state: &ReasonerState) -> ActionSet {
        let has_candidates = !state.candidates().is_empty();
        let needs_relation = has_candidates && state.relation_to_candidate_list.is_none();
        let listed = |property: &String| {
            state.include_list.contains(property) || state.exclude_list.contains(property)
        };

        let mut set = ActionSet::default();
        push_group(
            &mut set,
            self.include_properties
                .iter()
                .map(|p| (Action::AddInclude(p.clone()), !needs_relation && !listed(p))),
            INCLUDE_WEIGHT,
        );
        push_group(
            &mut set,
            self.exclude_properties
                .iter()
                .map(|p| (Action::AddExclude(p.clone()), !needs_relation && !listed(p))),
            EXCLUDE_WEIGHT,
        );
        push_group(
            &mut set,
            self.relations.iter().map(|r| {
                let current = state.relation_to_candidate_list.as_ref() == Some(r);
                (Action::ChangeRelation(r.clone()), has_candidates && !current)
            }),
            RELATION_WEIGHT,
        );
        push_group(
            &mut set,
            self.catalyst_labels.iter().map(|l| {
                let current = &state.catalyst_label == l;
                (Action::ChangeCatalystLabel(l.clone()), !needs_relation && !current)
            }),
            LABEL_WEIGHT,
        );
        if self.try_oxides {
            push_group(
                &mut set,
                std::iter::once((Action::ToggleOxides, !needs_relation)),
                OXIDE_WEIGHT,
            );
        }
        set
    }
}

#[allow(clippy::cast_precision_loss)]
fn push_group(set: &mut ActionSet, group: impl Iterator<Item = (Action, bool)>, weight: f64) {
    let group: Vec<(Action, bool)> = group.collect();
    let applicable = group.iter().filter(|(_, ok)| *ok).count();
    for (action, ok) in group {
        let prior = if ok { weight / applicable as f64 } else { 0.0 };
        set.actions.push(action);
        set.priors.push(prior);
    }
}

#[async_trait]
impl<C> Policy for ReasonerPolicy<C>
where
    C: LlmClientTrait,
{
    async fn get_actions(&self, state: &ReasonerState) -> Result<ActionSet, PolicyError> {
        let set = self.catalogue(state);
        if !set.has_positive() {
            tracing::debug!("No applicable actions");
            return Ok(ActionSet::default());
        }
        Ok(set.normalized())
    }

    async fn apply(
        &self,
        action: &Action,
        state: &ReasonerState,
        trial: bool,
    ) -> Result<ReasonerState, PolicyError> {
        let mut next = action.transform(state);
        if !trial {
            tracing::debug!(action = %action, "Querying successor");
            next.query(&self.client).await?;
        }
        Ok(next)
    }
}
