//! Reward aggregation with an explicit outcome for missing data.

/// Outcome of aggregating energies into a reward.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    /// A finite reward.
    Value(f64),
    /// Nothing valid to aggregate; the caller substitutes its penalty.
    NoValidData,
    /// Input that can never produce a reward.
    Malformed(String),
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn check_preferences(adsorbates: usize, preferences: &[f64]) -> Option<Aggregate> {
    if adsorbates != preferences.len() {
        return Some(Aggregate::Malformed(format!(
            "{} preferences for {adsorbates} adsorbates",
            preferences.len()
        )));
    }
    preferences
        .iter()
        .find(|p| !p.is_finite())
        .map(|p| Aggregate::Malformed(format!("preference {p} is not finite")))
}

/// Mean over adsorbates of `mean(energies)^preference`.
///
/// Used for model-estimated energies, one list per adsorbate.
#[must_use]
pub fn aggregate_energy_lists(lists: &[Vec<f64>], preferences: &[f64]) -> Aggregate {
    if let Some(malformed) = check_preferences(lists.len(), preferences) {
        return malformed;
    }
    if lists.is_empty() || lists.iter().any(Vec::is_empty) {
        return Aggregate::NoValidData;
    }
    if lists.iter().flatten().any(|e| !e.is_finite()) {
        return Aggregate::Malformed("non-finite energy".to_string());
    }

    let scores: Vec<f64> = lists
        .iter()
        .zip(preferences)
        .map(|(list, pref)| mean(list).abs().powf(*pref))
        .collect();
    let value = mean(&scores);
    if value.is_finite() {
        Aggregate::Value(value)
    } else {
        Aggregate::NoValidData
    }
}

/// Preference-weighted score of relaxed energies.
///
/// `per_candidate[c][a]` holds the valid adsorption energies of candidate `c`
/// with adsorbate `a`. Each candidate scores the mean over adsorbates of
/// `|min energy|^preference`, skipping adsorbates without data; a candidate
/// with no data at all scores `penalty`. The result is the mean over
/// candidates, or [`Aggregate::NoValidData`] when no candidate had data.
#[must_use]
pub fn aggregate_min_energies(
    per_candidate: &[Vec<Vec<f64>>],
    preferences: &[f64],
    penalty: f64,
) -> Aggregate {
    let mut scores = Vec::with_capacity(per_candidate.len());
    let mut any_valid = false;
    for adsorbates in per_candidate {
        if let Some(malformed) = check_preferences(adsorbates.len(), preferences) {
            return malformed;
        }
        let mut per_adsorbate = Vec::new();
        for (energies, pref) in adsorbates.iter().zip(preferences) {
            if energies.iter().any(|e| !e.is_finite()) {
                return Aggregate::Malformed("non-finite energy".to_string());
            }
            if let Some(min) = energies.iter().copied().reduce(f64::min) {
                per_adsorbate.push(min.abs().powf(*pref));
            }
        }
        if per_adsorbate.is_empty() {
            scores.push(penalty);
        } else {
            any_valid = true;
            scores.push(mean(&per_adsorbate));
        }
    }

    if !any_valid {
        return Aggregate::NoValidData;
    }
    let value = mean(&scores);
    if value.is_finite() {
        Aggregate::Value(value)
    } else {
        Aggregate::Malformed("aggregate is not finite".to_string())
    }
}
