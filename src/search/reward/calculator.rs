//! Relaxation jobs, the calculator seam, and cached batch dispatch.

use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::cache::ResultCache;
use crate::config::{GnnDevice, PlacementKind};
use crate::error::RewardError;

/// How adsorbate placements are enumerated for a slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// A fixed number of random placements.
    Random {
        /// Placements per adslab.
        samples: usize,
    },
    /// Enumerated adsorption sites.
    Heuristic {
        /// Sites per adslab.
        sites: usize,
    },
}

impl Placement {
    /// Build from the configured kind and count.
    #[must_use]
    pub const fn from_kind(kind: PlacementKind, count: usize) -> Self {
        match kind {
            PlacementKind::Random => Self::Random { samples: count },
            PlacementKind::Heuristic => Self::Heuristic { sites: count },
        }
    }

    /// Placement indices to relax.
    #[must_use]
    pub const fn indices(self) -> Range<usize> {
        match self {
            Self::Random { samples } => 0..samples,
            Self::Heuristic { sites } => 0..sites,
        }
    }

    /// Kind sent to the calculator.
    #[must_use]
    pub const fn kind(self) -> PlacementKind {
        match self {
            Self::Random { .. } => PlacementKind::Random,
            Self::Heuristic { .. } => PlacementKind::Heuristic,
        }
    }
}

/// One adsorbate placement on one slab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdsorptionJob {
    /// Adslab name, `{slab}_{adsorbate}`.
    pub name: String,
    /// Placement index.
    pub index: usize,
    /// Element symbols of the slab.
    pub slab_symbols: Vec<String>,
    /// Adsorbate formula.
    pub adsorbate: String,
    /// Placement strategy.
    pub placement: PlacementKind,
}

impl AdsorptionJob {
    /// Cache key, `{name}/{index}`.
    #[must_use]
    pub fn key(&self) -> String {
        job_key(&self.name, self.index)
    }
}

fn job_key(name: &str, index: usize) -> String {
    format!("{name}/{index}")
}

/// Result of relaxing one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdsorptionRecord {
    /// Adsorption energy in eV.
    #[serde(default)]
    pub adsorption_energy: Option<f64>,
    /// Energy of the relaxed slab-plus-adsorbate reference, in eV.
    #[serde(default)]
    pub reference_energy: Option<f64>,
    /// False when the structure failed to relax or desorbed.
    pub valid: bool,
}

impl AdsorptionRecord {
    /// A valid record.
    #[must_use]
    pub const fn valid(adsorption_energy: f64) -> Self {
        Self {
            adsorption_energy: Some(adsorption_energy),
            reference_energy: None,
            valid: true,
        }
    }

    /// An invalid record.
    #[must_use]
    pub const fn invalid() -> Self {
        Self {
            adsorption_energy: None,
            reference_energy: None,
            valid: false,
        }
    }

    /// Attach a reference energy.
    #[must_use]
    pub const fn with_reference_energy(mut self, energy: f64) -> Self {
        self.reference_energy = Some(energy);
        self
    }

    /// Adsorption energy when the record is valid.
    #[must_use]
    pub fn usable_energy(&self) -> Option<f64> {
        self.adsorption_energy.filter(|_| self.valid)
    }
}

/// Relaxes batches of adsorption jobs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdsorptionCalculator: Send + Sync {
    /// Relax `jobs`, returning one record per job in order.
    async fn relax_batch(&self, jobs: Vec<AdsorptionJob>) -> Result<Vec<AdsorptionRecord>, RewardError>;
}

#[async_trait]
impl<T: AdsorptionCalculator + ?Sized> AdsorptionCalculator for Arc<T> {
    async fn relax_batch(&self, jobs: Vec<AdsorptionJob>) -> Result<Vec<AdsorptionRecord>, RewardError> {
        (**self).relax_batch(jobs).await
    }
}

#[derive(Serialize)]
struct CalculatorInput<'a> {
    jobs: &'a [AdsorptionJob],
}

/// Calculator backed by an external command.
///
/// The command receives `{"jobs": [...]}` on stdin and must print a JSON
/// array of records, one per job, on stdout. Model settings are passed as
/// `--model`, `--device`, `--fmax`, `--steps` and `--traj-dir` arguments.
#[derive(Debug, Clone)]
pub struct CommandCalculator {
    command: String,
    model: String,
    device: GnnDevice,
    fmax: f64,
    steps: u32,
    traj_dir: PathBuf,
}

impl CommandCalculator {
    /// Calculator running `command`, which may include leading arguments.
    #[must_use]
    pub fn new(command: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            model: model.into(),
            device: GnnDevice::Cpu,
            fmax: 0.05,
            steps: 64,
            traj_dir: PathBuf::from("data/output/trajectories"),
        }
    }

    /// Set the device.
    #[must_use]
    pub const fn with_device(mut self, device: GnnDevice) -> Self {
        self.device = device;
        self
    }

    /// Set the force convergence threshold.
    #[must_use]
    pub const fn with_fmax(mut self, fmax: f64) -> Self {
        self.fmax = fmax;
        self
    }

    /// Set the step limit.
    #[must_use]
    pub const fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    /// Set the trajectory directory.
    #[must_use]
    pub fn with_traj_dir(mut self, traj_dir: impl Into<PathBuf>) -> Self {
        self.traj_dir = traj_dir.into();
        self
    }

    fn arguments(&self) -> Vec<String> {
        vec![
            "--model".to_string(),
            self.model.clone(),
            "--device".to_string(),
            self.device.to_string(),
            "--fmax".to_string(),
            self.fmax.to_string(),
            "--steps".to_string(),
            self.steps.to_string(),
            "--traj-dir".to_string(),
            self.traj_dir.display().to_string(),
        ]
    }
}

fn calculator_error(message: impl Into<String>) -> RewardError {
    RewardError::Calculator {
        message: message.into(),
    }
}

#[async_trait]
impl AdsorptionCalculator for CommandCalculator {
    async fn relax_batch(&self, jobs: Vec<AdsorptionJob>) -> Result<Vec<AdsorptionRecord>, RewardError> {
        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| calculator_error("empty calculator command"))?;
        let input = serde_json::to_vec(&CalculatorInput { jobs: &jobs })
            .map_err(|e| calculator_error(e.to_string()))?;

        tracing::info!(command = %self.command, jobs = jobs.len(), "Dispatching relaxation batch");
        let mut child = Command::new(program)
            .args(parts)
            .args(self.arguments())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| calculator_error(format!("cannot start {program}: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&input)
                .await
                .map_err(|e| calculator_error(format!("cannot write jobs: {e}")))?;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| calculator_error(e.to_string()))?;
        if !output.status.success() {
            return Err(calculator_error(format!(
                "{program} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let records: Vec<AdsorptionRecord> = serde_json::from_slice(&output.stdout)
            .map_err(|e| calculator_error(format!("unreadable calculator output: {e}")))?;
        if records.len() != jobs.len() {
            return Err(calculator_error(format!(
                "{} records for {} jobs",
                records.len(),
                jobs.len()
            )));
        }
        Ok(records)
    }
}

/// Records gathered for a set of jobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobResults {
    records: HashMap<String, AdsorptionRecord>,
    /// Jobs answered from the cache.
    pub cached: usize,
    /// Jobs relaxed in this call.
    pub calculated: usize,
}

impl JobResults {
    /// Record for one job.
    #[must_use]
    pub fn record(&self, name: &str, index: usize) -> Option<&AdsorptionRecord> {
        self.records.get(&job_key(name, index))
    }

    /// Records of `name` over `indices`, skipping missing ones.
    pub fn records_for<'a>(
        &'a self,
        name: &'a str,
        indices: Range<usize>,
    ) -> impl Iterator<Item = &'a AdsorptionRecord> + 'a {
        indices.filter_map(move |index| self.record(name, index))
    }

    /// Usable adsorption energies of `name` over `indices`.
    #[must_use]
    pub fn energies(&self, name: &str, indices: Range<usize>) -> Vec<f64> {
        self.records_for(name, indices)
            .filter_map(AdsorptionRecord::usable_energy)
            .collect()
    }
}

/// Resolve every job from the cache or the calculator.
///
/// Duplicate keys run once. Uncached jobs are relaxed in batches of
/// `batch_size`, the last batch possibly smaller, and every new record is
/// written to the cache.
///
/// # Errors
///
/// Returns a [`RewardError`] if the cache or the calculator fails, or the
/// calculator returns the wrong number of records.
pub async fn run_jobs(
    calculator: &dyn AdsorptionCalculator,
    cache: &ResultCache,
    jobs: Vec<AdsorptionJob>,
    batch_size: usize,
) -> Result<JobResults, RewardError> {
    let mut results = JobResults::default();
    let mut pending: Vec<AdsorptionJob> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for job in jobs {
        if !seen.insert(job.key()) {
            continue;
        }
        if let Some(record) = cache.load(&job.name, job.index).await? {
            results.cached += 1;
            results.records.insert(job.key(), record);
            continue;
        }
        pending.push(job);
        if pending.len() >= batch_size.max(1) {
            relax_and_store(calculator, cache, std::mem::take(&mut pending), &mut results).await?;
        }
    }
    if !pending.is_empty() {
        relax_and_store(calculator, cache, pending, &mut results).await?;
    }

    tracing::debug!(
        cached = results.cached,
        calculated = results.calculated,
        "Resolved relaxation jobs"
    );
    Ok(results)
}

async fn relax_and_store(
    calculator: &dyn AdsorptionCalculator,
    cache: &ResultCache,
    batch: Vec<AdsorptionJob>,
    results: &mut JobResults,
) -> Result<(), RewardError> {
    let keys: Vec<(String, usize)> = batch.iter().map(|j| (j.name.clone(), j.index)).collect();
    let records = calculator.relax_batch(batch).await?;
    if records.len() != keys.len() {
        return Err(calculator_error(format!(
            "{} records for {} jobs",
            records.len(),
            keys.len()
        )));
    }
    for ((name, index), record) in keys.into_iter().zip(records) {
        cache.store(&name, index, &record).await?;
        results.calculated += 1;
        results.records.insert(job_key(&name, index), record);
    }
    Ok(())
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

    fn job(name: &str, index: usize) -> AdsorptionJob {
        AdsorptionJob {
            name: name.to_string(),
            index,
            slab_symbols: vec!["Pt".into()],
            adsorbate: "CO".into(),
            placement: PlacementKind::Random,
        }
    }

    #[test]
    fn test_placement_indices() {
        assert_eq!(Placement::Random { samples: 3 }.indices(), 0..3);
        assert_eq!(
            Placement::from_kind(PlacementKind::Heuristic, 5),
            Placement::Heuristic { sites: 5 }
        );
        assert_eq!(Placement::Heuristic { sites: 2 }.kind(), PlacementKind::Heuristic);
    }

    #[test]
    fn test_record_usable_energy() {
        assert_eq!(AdsorptionRecord::valid(-1.0).usable_energy(), Some(-1.0));
        assert_eq!(AdsorptionRecord::invalid().usable_energy(), None);
        let stale = AdsorptionRecord {
            adsorption_energy: Some(-2.0),
            reference_energy: None,
            valid: false,
        };
        assert_eq!(stale.usable_energy(), None);
    }

    #[tokio::test]
    async fn test_run_jobs_batches_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path());
        cache
            .store("Pt_CO", 0, &AdsorptionRecord::valid(-3.0))
            .await
            .unwrap();

        let mut calculator = MockAdsorptionCalculator::new();
        let mut sizes = vec![2, 1];
        calculator
            .expect_relax_batch()
            .times(2)
            .returning(move |jobs| {
                assert_eq!(jobs.len(), sizes.remove(0));
                Ok(jobs.iter().map(|_| AdsorptionRecord::valid(-1.0)).collect())
            });

        let jobs = vec![
            job("Pt_CO", 0),
            job("Pt_CO", 1),
            job("Pt_CO", 1),
            job("Pt_CO", 2),
            job("Pt_CO", 3),
        ];
        let results = run_jobs(&calculator, &cache, jobs, 2).await.unwrap();
        assert_eq!(results.cached, 1);
        assert_eq!(results.calculated, 3);
        assert_eq!(results.energies("Pt_CO", 0..4), vec![-3.0, -1.0, -1.0, -1.0]);
        assert!(cache.load("Pt_CO", 3).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_run_jobs_rejects_short_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut calculator = MockAdsorptionCalculator::new();
        calculator.expect_relax_batch().returning(|_| Ok(vec![]));
        let err = run_jobs(&calculator, &ResultCache::new(dir.path()), vec![job("Cu_H", 0)], 4)
            .await
            .unwrap_err();
        assert!(matches!(err, RewardError::Calculator { .. }));
    }

    #[tokio::test]
    async fn test_command_calculator_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("relax.sh");
        std::fs::write(
            &script,
            "cat > \"$(dirname \"$0\")/input.json\"\necho '[{\"adsorption_energy\": -1.5, \"valid\": true}]'\n",
        )
        .unwrap();
        let calculator = CommandCalculator::new(format!("sh {}", script.display()), "gemnet")
            .with_device(GnnDevice::Cuda)
            .with_steps(10);

        let records = calculator.relax_batch(vec![job("Pt_CO", 0)]).await.unwrap();
        assert_eq!(records, vec![AdsorptionRecord::valid(-1.5)]);

        let input: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("input.json")).unwrap())
                .unwrap();
        assert_eq!(input["jobs"][0]["name"], "Pt_CO");
        assert_eq!(input["jobs"][0]["placement"], "random");
    }

    #[tokio::test]
    async fn test_command_calculator_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fail.sh");
        std::fs::write(&script, "echo 'out of memory' >&2\nexit 3\n").unwrap();
        let calculator = CommandCalculator::new(format!("sh {}", script.display()), "gemnet");
        let err = calculator.relax_batch(vec![job("Pt_CO", 0)]).await.unwrap_err();
        assert!(err.to_string().contains("out of memory"));
    }

    #[tokio::test]
    async fn test_command_calculator_missing_program() {
        let calculator = CommandCalculator::new("definitely-not-a-calculator-binary", "gemnet");
        let err = calculator.relax_batch(vec![job("Pt_CO", 0)]).await.unwrap_err();
        assert!(err.to_string().contains("cannot start"));
    }

    #[tokio::test]
    async fn test_command_calculator_empty_command() {
        let calculator = CommandCalculator::new("  ", "gemnet");
        assert!(calculator.relax_batch(vec![]).await.is_err());
    }
}
