//! Candidate generation prompts.

use crate::error::StateError;

/// Default chain-of-thought template for candidate generation.
///
/// Placeholders: `{num_answers}`, `{catalyst_label}`, `{candidate_list_statement}`,
/// `{adsorbates}`, `{include_statement}`, `{exclude_statement}`.
pub const DEFAULT_GENERATION_TEMPLATE: &str = "Generate a list of top-{num_answers} candidate \
{catalyst_label} {candidate_list_statement}for the adsorption of {adsorbates}. \
{include_statement}{exclude_statement}Provide scientific explanations for each of the \
{catalyst_label}. Finally, return a python list named final_answer which contains the \
top-{num_answers} {catalyst_label}. Let's think step-by-step.";

/// Inputs for rendering a generation prompt.
#[derive(Debug, Clone, Copy)]
pub struct GenerationPrompt<'a> {
    /// Template with placeholders.
    pub template: &'a str,
    /// Catalyst label, e.g. "bimetallic catalysts".
    pub catalyst_label: &'a str,
    /// Number of answers requested.
    pub num_answers: usize,
    /// Candidates proposed by the parent state.
    pub candidate_list: &'a [String],
    /// How the new answer relates to the previous candidates.
    pub relation_to_candidate_list: Option<&'a str>,
    /// Properties the candidates should have.
    pub include_list: &'a [String],
    /// Properties the candidates should not have.
    pub exclude_list: &'a [String],
    /// Target adsorbates.
    pub adsorbates: &'a [String],
}

/// Render a generation prompt.
///
/// # Errors
///
/// Returns [`StateError::MissingRelation`] when previous candidates are given
/// without a relation phrase.
pub fn generation_prompt(input: &GenerationPrompt<'_>) -> Result<String, StateError> {
    let candidate_list_statement = match (
        input.candidate_list.is_empty(),
        input.relation_to_candidate_list,
    ) {
        (true, _) => String::new(),
        (false, Some(relation)) => {
            format!("{relation} {} ", input.candidate_list.join(", ").trim())
        }
        (false, None) => {
            return Err(StateError::MissingRelation {
                candidates: input.candidate_list.to_vec(),
            })
        }
    };

    let include_statement = property_statement("Include", input.catalyst_label, input.include_list);
    let exclude_statement = property_statement("Exclude", input.catalyst_label, input.exclude_list);

    Ok(fill_template(
        input.template,
        &[
            ("catalyst_label", input.catalyst_label.to_string()),
            ("candidate_list_statement", candidate_list_statement),
            ("include_statement", include_statement),
            ("exclude_statement", exclude_statement),
            ("num_answers", input.num_answers.to_string()),
            ("adsorbates", input.adsorbates.join(", ")),
        ],
    ))
}

fn property_statement(verb: &str, catalyst_label: &str, properties: &[String]) -> String {
    if properties.is_empty() {
        String::new()
    } else {
        format!(
            "{verb} candidate {catalyst_label} with the following properties: {}. ",
            properties.join(", ")
        )
    }
}

/// Replace each `{key}` in `template` with its value. Unknown placeholders are left alone.
#[must_use]
pub fn fill_template(template: &str, values: &[(&str, String)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |text, (key, value)| {
            text.replace(&format!("{{{key}}}"), value)
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_generation_prompt_root_state() {
        let ads = strings(&["CO", "H2O"]);
        let prompt = generation_prompt(&GenerationPrompt {
            template: DEFAULT_GENERATION_TEMPLATE,
            catalyst_label: "catalysts",
            num_answers: 3,
            candidate_list: &[],
            relation_to_candidate_list: None,
            include_list: &[],
            exclude_list: &[],
            adsorbates: &ads,
        })
        .unwrap();

        assert!(prompt.starts_with(
            "Generate a list of top-3 candidate catalysts for the adsorption of CO, H2O. "
        ));
        assert!(prompt.contains("final_answer"));
        assert!(!prompt.contains('{'));
    }

    #[test]
    fn test_generation_prompt_with_statements() {
        let candidates = strings(&["Pt", "Pd"]);
        let include = strings(&["high activity", "low cost"]);
        let exclude = strings(&["high toxicity"]);
        let prompt = generation_prompt(&GenerationPrompt {
            template: "{candidate_list_statement}|{include_statement}|{exclude_statement}",
            catalyst_label: "metallic catalysts",
            num_answers: 3,
            candidate_list: &candidates,
            relation_to_candidate_list: Some("similar to"),
            include_list: &include,
            exclude_list: &exclude,
            adsorbates: &[],
        })
        .unwrap();

        assert_eq!(
            prompt,
            "similar to Pt, Pd |Include candidate metallic catalysts with the following \
             properties: high activity, low cost. |Exclude candidate metallic catalysts with \
             the following properties: high toxicity. "
        );
    }

    #[test]
    fn test_generation_prompt_missing_relation() {
        let candidates = strings(&["Pt"]);
        let err = generation_prompt(&GenerationPrompt {
            template: DEFAULT_GENERATION_TEMPLATE,
            catalyst_label: "catalysts",
            num_answers: 3,
            candidate_list: &candidates,
            relation_to_candidate_list: None,
            include_list: &[],
            exclude_list: &[],
            adsorbates: &[],
        })
        .unwrap_err();
        assert_eq!(
            err,
            StateError::MissingRelation {
                candidates: vec!["Pt".to_string()]
            }
        );
    }

    #[test]
    fn test_fill_template_leaves_unknown_placeholders() {
        let text = fill_template("{a} and {b}", &[("a", "x".to_string())]);
        assert_eq!(text, "x and {b}");
    }
}
