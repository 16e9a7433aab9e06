//! Persisted tree documents.
//!
//! Trees are saved as one JSON document per search, rewritten after every
//! step. Writes go to a temporary sibling file that is renamed over the
//! target, so a crash mid-write leaves the previous checkpoint intact.
//!
//! Keys not known to a snapshot are kept in `extra` and written back, which
//! lets the driver store run timings next to the tree.

use std::fmt::Display;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::RewardPolarity;
use crate::error::CheckpointError;

/// Persisted beam-search tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamSnapshot {
    /// Retained states per level, as attribute mappings.
    pub nodes: Vec<Vec<Value>>,
    /// Rewards of the retained states.
    pub node_rewards: Vec<Vec<f64>>,
    /// Parent index of each retained state in the previous level; -1 at the root.
    pub parent_idx: Vec<Vec<i64>>,
    /// Generated but discarded states per level; the root level is empty.
    pub generated_nodes: Vec<Vec<Value>>,
    /// Rewards of the discarded states.
    pub generated_node_rewards: Vec<Vec<f64>>,
    /// Parent index of each discarded state in the previous level.
    pub generated_parent_idx: Vec<Vec<i64>>,
    /// Actions expanded per node per step.
    pub num_generate: usize,
    /// States retained per level.
    pub num_keep: usize,
    /// Which end of the reward scale the kept states were selected from.
    #[serde(default)]
    pub polarity: RewardPolarity,
    /// Epoch seconds of the first step.
    #[serde(default)]
    pub start_time: Option<f64>,
    /// Epoch seconds of the last save.
    #[serde(default)]
    pub end_time: Option<f64>,
    /// Unrecognized keys, preserved.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn corrupt(reason: impl Into<String>) -> CheckpointError {
    CheckpointError::Corrupt {
        reason: reason.into(),
    }
}

fn check_parents(parents: &[i64], previous_len: usize, what: &str) -> Result<(), CheckpointError> {
    match parents
        .iter()
        .find(|&&p| usize::try_from(p).map_or(true, |p| p >= previous_len))
    {
        Some(p) => Err(corrupt(format!(
            "{what} parent index {p} outside previous level of {previous_len}"
        ))),
        None => Ok(()),
    }
}

impl BeamSnapshot {
    /// Check the structural invariants of the tree.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Corrupt`] describing the first violation.
    pub fn validate(&self) -> Result<(), CheckpointError> {
        if self.num_keep == 0 || self.num_generate == 0 {
            return Err(corrupt("num_keep and num_generate must be positive"));
        }
        let levels = self.nodes.len();
        if levels == 0 {
            return Err(corrupt("tree has no root level"));
        }
        if self.node_rewards.len() != levels || self.parent_idx.len() != levels {
            return Err(corrupt("nodes, node_rewards and parent_idx differ in depth"));
        }
        if self.generated_nodes.len() != levels
            || self.generated_node_rewards.len() != levels
            || self.generated_parent_idx.len() != levels
        {
            return Err(corrupt("generated structures differ in depth from nodes"));
        }
        if self.nodes[0].len() != 1 || self.parent_idx[0] != [-1] {
            return Err(corrupt("root level must hold one node with parent -1"));
        }
        if !self.generated_nodes[0].is_empty()
            || !self.generated_node_rewards[0].is_empty()
            || !self.generated_parent_idx[0].is_empty()
        {
            return Err(corrupt("root level cannot hold generated nodes"));
        }

        for level in 1..levels {
            let len = self.nodes[level].len();
            if self.node_rewards[level].len() != len || self.parent_idx[level].len() != len {
                return Err(corrupt(format!("level {level} has mismatched lengths")));
            }
            if len > self.num_keep {
                return Err(corrupt(format!(
                    "level {level} holds {len} nodes, more than num_keep {}",
                    self.num_keep
                )));
            }
            check_parents(&self.parent_idx[level], self.nodes[level - 1].len(), "retained")?;

            let generated = self.generated_nodes[level].len();
            if self.generated_node_rewards[level].len() != generated
                || self.generated_parent_idx[level].len() != generated
            {
                return Err(corrupt(format!("generated level {level} has mismatched lengths")));
            }
            check_parents(
                &self.generated_parent_idx[level],
                self.nodes[level - 1].len(),
                "generated",
            )?;
        }
        Ok(())
    }
}

/// Persisted Monte Carlo tree, one entry per node in creation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MctsSnapshot {
    /// States as attribute mappings.
    pub nodes: Vec<Value>,
    /// Reward of each node when it was created.
    pub node_rewards: Vec<f64>,
    /// Parent index of each node; -1 at the root.
    pub parent_idx: Vec<i64>,
    /// Visit counts.
    pub visits: Vec<u64>,
    /// Accumulated backed-up value.
    pub value_sums: Vec<f64>,
    /// Prior of the action that created each node.
    pub priors: Vec<f64>,
    /// Nodes found to have no actions.
    #[serde(default)]
    pub terminal: Vec<bool>,
    /// Exploration constant of the selection rule.
    pub exploration_constant: f64,
    /// Per-level discount applied during backup.
    pub discount_factor: f64,
    /// Actions expanded per node.
    pub num_generate: usize,
    /// Epoch seconds of the first step.
    #[serde(default)]
    pub start_time: Option<f64>,
    /// Epoch seconds of the last save.
    #[serde(default)]
    pub end_time: Option<f64>,
    /// Unrecognized keys, preserved.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MctsSnapshot {
    /// Check that every per-node array has one entry per node and parents
    /// precede their children.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Corrupt`] describing the first violation.
    pub fn validate(&self) -> Result<(), CheckpointError> {
        let n = self.nodes.len();
        if n == 0 {
            return Err(corrupt("tree has no root"));
        }
        if self.num_generate == 0 {
            return Err(corrupt("num_generate must be positive"));
        }
        let lengths = [
            self.node_rewards.len(),
            self.parent_idx.len(),
            self.visits.len(),
            self.value_sums.len(),
            self.priors.len(),
        ];
        if lengths.iter().any(|&len| len != n) {
            return Err(corrupt(format!("per-node arrays differ from {n} nodes")));
        }
        if !self.terminal.is_empty() && self.terminal.len() != n {
            return Err(corrupt("terminal flags differ from node count"));
        }
        if self.parent_idx[0] != -1 {
            return Err(corrupt("root parent must be -1"));
        }
        for (i, &parent) in self.parent_idx.iter().enumerate().skip(1) {
            if usize::try_from(parent).map_or(true, |p| p >= i) {
                return Err(corrupt(format!("node {i} has invalid parent {parent}")));
            }
        }
        Ok(())
    }
}

/// Serialize a snapshot into a document.
///
/// # Errors
///
/// Returns [`CheckpointError::Serialize`] on failure, e.g. a non-finite reward.
pub fn to_document<T: Serialize>(snapshot: &T) -> Result<Value, CheckpointError> {
    serde_json::to_value(snapshot).map_err(|e| CheckpointError::Serialize {
        message: e.to_string(),
    })
}

/// Parse a snapshot from a document.
///
/// # Errors
///
/// Returns [`CheckpointError::Deserialize`] if required keys are missing or
/// mistyped.
pub fn from_document<T: for<'de> Deserialize<'de>>(document: Value) -> Result<T, CheckpointError> {
    serde_json::from_value(document).map_err(|e| CheckpointError::Deserialize {
        message: e.to_string(),
    })
}

fn io_error(path: &Path, error: &std::io::Error) -> CheckpointError {
    CheckpointError::Io {
        path: path.display().to_string(),
        message: error.to_string(),
    }
}

/// Write `document` to `path`, replacing previous content.
///
/// # Errors
///
/// Returns [`CheckpointError`] on I/O or serialization failure.
pub async fn write_document(path: &Path, document: &Value) -> Result<(), CheckpointError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| io_error(dir, &e))?;
    }
    let bytes = serde_json::to_vec_pretty(document).map_err(|e| CheckpointError::Serialize {
        message: e.to_string(),
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".tmp-{}", uuid::Uuid::new_v4()));
    let tmp = std::path::PathBuf::from(tmp);
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| io_error(&tmp, &e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_error(path, &e))?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Checkpoint written");
    Ok(())
}

/// Read the document at `path`.
///
/// Returns `None` when the file is missing or empty.
///
/// # Errors
///
/// Returns [`CheckpointError`] if the file cannot be read or is not JSON.
pub async fn read_document(path: &Path) -> Result<Option<Value>, CheckpointError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, &e)),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| CheckpointError::Deserialize {
            message: format!("{}: {e}", path.display()),
        })
}

/// Fail unless a restored tree matches the requested configuration.
///
/// # Errors
///
/// Returns [`CheckpointError::ConfigMismatch`] naming the first field that
/// differs.
pub fn ensure_matches<V>(field: &str, expected: V, found: V) -> Result<(), CheckpointError>
where
    V: PartialEq + Display,
{
    if expected == found {
        Ok(())
    } else {
        Err(CheckpointError::ConfigMismatch {
            field: field.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        })
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
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn beam() -> BeamSnapshot {
        from_document(json!({
            "nodes": [[{"answer": null}], [{"answer": "a"}, {"answer": "b"}]],
            "node_rewards": [[0.0], [5.0, 3.0]],
            "parent_idx": [[-1], [0, 0]],
            "generated_nodes": [[], [{"answer": "c"}]],
            "generated_node_rewards": [[], [1.0]],
            "generated_parent_idx": [[], [0]],
            "num_generate": 4,
            "num_keep": 2,
            "start_time": 1.5,
            "end_time": null,
            "total_time": 12.0
        }))
        .unwrap()
    }

    #[test]
    fn test_beam_snapshot_keeps_extra_keys() {
        let snapshot = beam();
        assert!(snapshot.validate().is_ok());
        assert_eq!(snapshot.extra["total_time"], 12.0);
        let document = to_document(&snapshot).unwrap();
        assert_eq!(document["total_time"], 12.0);
        assert_eq!(document["num_keep"], 2);
    }

    #[test]
    fn test_beam_snapshot_detects_bad_parent() {
        let mut snapshot = beam();
        snapshot.parent_idx[1][1] = 1;
        let err = snapshot.validate().unwrap_err();
        assert!(err.to_string().contains("parent index 1"));
    }

    #[test]
    fn test_beam_snapshot_detects_length_mismatch() {
        let mut snapshot = beam();
        snapshot.node_rewards[1].pop();
        assert!(matches!(
            snapshot.validate(),
            Err(CheckpointError::Corrupt { .. })
        ));
        let mut snapshot = beam();
        snapshot.num_keep = 1;
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_beam_snapshot_generated_levels_align_with_nodes() {
        let mut snapshot = beam();
        assert_eq!(snapshot.generated_nodes.len(), snapshot.nodes.len());
        assert_eq!(snapshot.polarity, RewardPolarity::HigherIsBetter);

        snapshot.generated_nodes.remove(0);
        snapshot.generated_node_rewards.remove(0);
        snapshot.generated_parent_idx.remove(0);
        let err = snapshot.validate().unwrap_err();
        assert!(err.to_string().contains("differ in depth"));

        let mut snapshot = beam();
        snapshot.generated_parent_idx[1][0] = 1;
        let err = snapshot.validate().unwrap_err();
        assert!(err.to_string().contains("generated parent index 1"));

        let mut snapshot = beam();
        snapshot.generated_nodes[0].push(json!({}));
        snapshot.generated_node_rewards[0].push(0.0);
        snapshot.generated_parent_idx[0].push(0);
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_missing_keys_fail_to_parse() {
        let err = from_document::<BeamSnapshot>(json!({"nodes": []})).unwrap_err();
        assert!(matches!(err, CheckpointError::Deserialize { .. }));
    }

    #[test]
    fn test_mcts_snapshot_validate() {
        let mut snapshot: MctsSnapshot = from_document(json!({
            "nodes": [{}, {}, {}],
            "node_rewards": [0.0, 1.0, 2.0],
            "parent_idx": [-1, 0, 1],
            "visits": [2, 2, 1],
            "value_sums": [3.0, 3.0, 2.0],
            "priors": [1.0, 0.5, 1.0],
            "exploration_constant": 1.0,
            "discount_factor": 0.9,
            "num_generate": 2
        }))
        .unwrap();
        assert!(snapshot.validate().is_ok());
        snapshot.parent_idx[2] = 2;
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_ensure_matches() {
        assert!(ensure_matches("num_keep", 2, 2).is_ok());
        assert_eq!(
            ensure_matches("num_keep", 2, 3).unwrap_err(),
            CheckpointError::ConfigMismatch {
                field: "num_keep".into(),
                expected: "2".into(),
                found: "3".into(),
            }
        );
        assert_eq!(
            ensure_matches(
                "polarity",
                RewardPolarity::HigherIsBetter,
                RewardPolarity::LowerIsBetter
            )
            .unwrap_err(),
            CheckpointError::ConfigMismatch {
                field: "polarity".into(),
                expected: "higher-is-better".into(),
                found: "lower-is-better".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_write_then_read_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trees").join("search_tree_0.json");
        assert_eq!(read_document(&path).await.unwrap(), None);

        write_document(&path, &json!({"a": 1})).await.unwrap();
        write_document(&path, &json!({"a": 2})).await.unwrap();
        assert_eq!(read_document(&path).await.unwrap(), Some(json!({"a": 2})));
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_read_empty_and_corrupt_documents() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, "  \n").unwrap();
        assert_eq!(read_document(&empty).await.unwrap(), None);

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{\"nodes\": [").unwrap();
        assert!(matches!(
            read_document(&broken).await,
            Err(CheckpointError::Deserialize { .. })
        ));
    }
}
