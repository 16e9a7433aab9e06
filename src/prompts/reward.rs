//! Reward and symbol-resolution prompts.

use super::generation::fill_template;

/// System prompt for adsorption energy queries.
pub const REWARD_SYSTEM_PROMPT: &str = "You are a helpful catalysis expert with extensive \
knowledge of the adsorption of atoms and molecules. You can offer an approximate value of \
adsorption energies of various adsorbates to various catalysts.";

/// System prompt for element-symbol queries.
pub const SYMBOLS_SYSTEM_PROMPT: &str = "You are a helpful chemistry expert with extensive \
knowledge of catalyst composition. You return the chemical symbols of the elements that make \
up a catalyst.";

/// Prompt asking for one adsorption energy per candidate.
///
/// A custom `reward_template` may use `{adsorbate}`, `{candidate_list}` and
/// `{num_candidates}`.
#[must_use]
pub fn adsorption_energy_list_prompt(
    adsorbate: &str,
    candidates: &[String],
    reward_template: Option<&str>,
) -> String {
    let candidate_list = candidates.join(", ");
    match reward_template {
        Some(template) => fill_template(
            template,
            &[
                ("adsorbate", adsorbate.to_string()),
                ("candidate_list", candidate_list),
                ("num_candidates", candidates.len().to_string()),
            ],
        ),
        None => format!(
            "Generate a list of adsorption energies, in eV, for the adsorbate {adsorbate} to \
             the surface of each of the following catalysts: {candidate_list}. Return the \
             adsorption energies as a list of only {} numbers in the order specified, as a \
             python list named final_answer.",
            candidates.len()
        ),
    }
}

/// Prompt asking for the element symbols of each candidate.
#[must_use]
pub fn symbols_prompt(candidates: &[String]) -> String {
    let listing: String = candidates
        .iter()
        .map(|c| format!("- {c}\n"))
        .collect();
    format!(
        "For each of the following catalysts, list the chemical symbols of the elements it is \
         made of:\n{listing}Answer with one line per catalyst in the form `name: [Symbol, \
         Symbol]`, using exactly the names given. Write `name: None` if the catalyst has no \
         well-defined composition."
    )
}
