//! Dataset rows and the root-state factory.
//!
//! A dataset is a JSON array of rows, one search per row:
//!
//! ```json
//! [{"id": 0, "dataset": "oc", "query": ["CO", "H2O"], "catalyst_label": "metallic catalysts"}]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::{ReasonerState, DEFAULT_CATALYST_LABEL, DEFAULT_NUM_ANSWERS};

/// One dataset row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    /// Row identifier.
    #[serde(default)]
    pub id: Option<u64>,
    /// Name of the source dataset.
    #[serde(default)]
    pub dataset: Option<String>,
    /// Target adsorbates.
    pub query: Vec<String>,
    /// Per-adsorbate preference exponents; 1.0 each when absent.
    #[serde(default)]
    pub ads_preferences: Option<Vec<f64>>,
    /// Catalyst label.
    #[serde(default)]
    pub catalyst_label: Option<String>,
    /// Number of candidates requested.
    #[serde(default)]
    pub num_answers: Option<usize>,
    /// Generation template; the chain-of-thought default when absent.
    #[serde(default)]
    pub template: Option<String>,
    /// Reward query template.
    #[serde(default)]
    pub reward_template: Option<String>,
    /// Initial include list.
    #[serde(default)]
    pub include_list: Vec<String>,
    /// Initial exclude list.
    #[serde(default)]
    pub exclude_list: Vec<String>,
}

/// Load all rows of a JSON dataset.
///
/// # Errors
///
/// Returns [`AppError::Dataset`] if the file cannot be read or parsed.
pub fn load_dataset(path: &Path) -> Result<Vec<DatasetRow>, AppError> {
    let text = std::fs::read_to_string(path).map_err(|e| AppError::Dataset {
        message: format!("cannot read {}: {e}", path.display()),
    })?;
    let rows: Vec<DatasetRow> = serde_json::from_str(&text).map_err(|e| AppError::Dataset {
        message: format!("cannot parse {}: {e}", path.display()),
    })?;
    tracing::info!(path = %path.display(), rows = rows.len(), "Loaded dataset");
    Ok(rows)
}

/// Build the root search state for a dataset row.
///
/// # Errors
///
/// Returns [`AppError::Dataset`] if the row has no adsorbates or its
/// preferences do not match its adsorbates.
pub fn make_state(
    row: &DatasetRow,
    prediction_model: &str,
    reward_model: &str,
) -> Result<ReasonerState, AppError> {
    if row.query.is_empty() {
        return Err(AppError::Dataset {
            message: "row has no adsorbates".to_string(),
        });
    }
    let preferences = row
        .ads_preferences
        .clone()
        .unwrap_or_else(|| vec![1.0; row.query.len()]);
    if preferences.len() != row.query.len() {
        return Err(AppError::Dataset {
            message: format!(
                "{} preferences for {} adsorbates",
                preferences.len(),
                row.query.len()
            ),
        });
    }

    let mut state = ReasonerState::new(row.query.clone(), prediction_model, reward_model)
        .with_ads_preferences(preferences)
        .with_catalyst_label(
            row.catalyst_label
                .clone()
                .unwrap_or_else(|| DEFAULT_CATALYST_LABEL.to_string()),
        )
        .with_num_answers(row.num_answers.unwrap_or(DEFAULT_NUM_ANSWERS))
        .with_include_list(row.include_list.clone())
        .with_exclude_list(row.exclude_list.clone());
    if let Some(template) = &row.template {
        state = state.with_template(template.clone());
    }
    if let Some(template) = &row.reward_template {
        state = state.with_reward_template(template.clone());
    }
    Ok(state)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_dataset_and_make_state() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"id": 0, "dataset": "oc", "query": ["CO"]}},
                {{"query": ["CO", "H2O"], "ads_preferences": [1.0, -1.0],
                  "catalyst_label": "bimetallic catalysts", "include_list": ["low cost"]}}
            ]"#
        )
        .unwrap();

        let rows = load_dataset(file.path()).unwrap();
        assert_eq!(rows.len(), 2);

        let first = make_state(&rows[0], "pred", "rew").unwrap();
        assert_eq!(first.ads_preferences, vec![1.0]);
        assert_eq!(first.catalyst_label, DEFAULT_CATALYST_LABEL);
        assert_eq!(first.prediction_model, "pred");

        let second = make_state(&rows[1], "pred", "rew").unwrap();
        assert_eq!(second.ads_preferences, vec![1.0, -1.0]);
        assert_eq!(second.catalyst_label, "bimetallic catalysts");
        assert_eq!(second.include_list, vec!["low cost"]);
    }

    #[test]
    fn test_make_state_rejects_mismatched_preferences() {
        let row = DatasetRow {
            id: None,
            dataset: None,
            query: vec!["CO".into()],
            ads_preferences: Some(vec![1.0, 2.0]),
            catalyst_label: None,
            num_answers: None,
            template: None,
            reward_template: None,
            include_list: Vec::new(),
            exclude_list: Vec::new(),
        };
        assert!(matches!(
            make_state(&row, "p", "r"),
            Err(AppError::Dataset { .. })
        ));
    }

    #[test]
    fn test_load_dataset_missing_file() {
        let err = load_dataset(Path::new("/nonexistent/dataset.json")).unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
