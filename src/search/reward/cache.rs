//! On-disk cache of relaxation results.
//!
//! One JSON file per job at `{root}/{name}/{index}.json`. A present file is
//! reused as is; new results are written to a temporary file and renamed into
//! place. A single writer per path is assumed.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::calculator::AdsorptionRecord;
use crate::error::RewardError;

/// Cache of [`AdsorptionRecord`]s keyed by `(name, index)`.
#[derive(Debug, Clone)]
pub struct ResultCache {
    root: PathBuf,
}

fn cache_error(path: &Path, error: impl std::fmt::Display) -> RewardError {
    RewardError::Cache {
        message: format!("{}: {error}", path.display()),
    }
}

impl ResultCache {
    /// Cache rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record for `name` and `index`.
    #[must_use]
    pub fn path(&self, name: &str, index: usize) -> PathBuf {
        self.root.join(name).join(format!("{index}.json"))
    }

    /// Load a cached record, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::Cache`] if the file exists but cannot be read
    /// or parsed.
    pub async fn load(&self, name: &str, index: usize) -> Result<Option<AdsorptionRecord>, RewardError> {
        let path = self.path(name, index);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| cache_error(&path, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(cache_error(&path, e)),
        }
    }

    /// Store a record, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::Cache`] on I/O or serialization failure.
    pub async fn store(&self, name: &str, index: usize, record: &AdsorptionRecord) -> Result<(), RewardError> {
        let path = self.path(name, index);
        let dir = self.root.join(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| cache_error(&dir, e))?;

        let bytes = serde_json::to_vec_pretty(record).map_err(|e| cache_error(&path, e))?;
        let tmp = dir.join(format!("{index}.json.tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| cache_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| cache_error(&path, e))?;
        tracing::debug!(path = %path.display(), "Cached relaxation result");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path());
        assert!(cache.load("PtNi_CO", 0).await.unwrap().is_none());

        let record = AdsorptionRecord::valid(-1.25).with_reference_energy(-0.5);
        cache.store("PtNi_CO", 0, &record).await.unwrap();
        assert!(dir.path().join("PtNi_CO").join("0.json").exists());
        assert_eq!(cache.load("PtNi_CO", 0).await.unwrap(), Some(record));
        assert!(cache.load("PtNi_CO", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Pt_H")).unwrap();
        std::fs::write(dir.path().join("Pt_H").join("3.json"), "{not json").unwrap();
        let cache = ResultCache::new(dir.path());
        assert!(matches!(
            cache.load("Pt_H", 3).await,
            Err(RewardError::Cache { .. })
        ));
    }

    #[tokio::test]
    async fn test_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path());
        cache.store("Cu_O", 2, &AdsorptionRecord::invalid()).await.unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path().join("Cu_O"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["2.json"]);
    }
}
