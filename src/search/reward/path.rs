//! Reaction-path reward.
//!
//! A path is a sequence of adsorbed intermediates on catalyst slabs. Each
//! step is relaxed with heuristic site placement and its lowest composite
//! energy (adsorption plus reference) taken. The activation estimate of a
//! path is the largest energy increase between consecutive steps; the best
//! path minimizes it.

use serde::{Deserialize, Serialize};

use super::cache::ResultCache;
use super::calculator::{run_jobs, AdsorptionCalculator, AdsorptionJob, Placement};
use super::simulation::{adslab_name, reduce_candidate_symbols};
use crate::error::RewardError;

/// One intermediate of a reaction path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionStep {
    /// Slab element symbols.
    pub symbols: Vec<String>,
    /// Adsorbed intermediate.
    pub adsorbate: String,
    /// Display name, e.g. `*CO`.
    pub name: String,
}

impl ReactionStep {
    fn adslab(&self) -> String {
        adslab_name(&reduce_candidate_symbols(&self.symbols), &self.adsorbate)
    }
}

/// Energies and activation estimate of one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathBreakdown {
    /// Lowest composite energy per step, `None` where no structure was valid.
    pub energies: Vec<Option<f64>>,
    /// Largest consecutive energy increase; infinite when a step failed.
    pub activation: f64,
}

/// Outcome of [`PathReward::evaluate_paths`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEvaluation {
    /// Index of the path with the lowest activation estimate.
    pub best_index: Option<usize>,
    /// Its activation estimate, or the penalty when every path failed.
    pub best_value: f64,
    /// Per-path detail, in input order.
    pub paths: Vec<PathBreakdown>,
}

/// Scores reaction paths by their activation estimate.
pub struct PathReward<A>
where
    A: AdsorptionCalculator,
{
    calculator: A,
    cache: ResultCache,
    sites: usize,
    batch_size: usize,
    penalty_value: f64,
}

impl<A> PathReward<A>
where
    A: AdsorptionCalculator,
{
    /// Create a path reward relaxing `sites` placements per step.
    #[must_use]
    pub const fn new(
        calculator: A,
        cache: ResultCache,
        sites: usize,
        batch_size: usize,
        penalty_value: f64,
    ) -> Self {
        Self {
            calculator,
            cache,
            sites,
            batch_size,
            penalty_value,
        }
    }

    /// Relax every step of every path and pick the best path.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::MalformedInput`] for an empty path, or a
    /// calculator or cache error.
    pub async fn evaluate_paths(&self, paths: &[Vec<ReactionStep>]) -> Result<PathEvaluation, RewardError> {
        if let Some(i) = paths.iter().position(Vec::is_empty) {
            return Err(RewardError::MalformedInput {
                reason: format!("path {i} has no steps"),
            });
        }

        let placement = Placement::Heuristic { sites: self.sites };
        let jobs: Vec<AdsorptionJob> = paths
            .iter()
            .flatten()
            .flat_map(|step| {
                let name = step.adslab();
                placement.indices().map(move |index| AdsorptionJob {
                    name: name.clone(),
                    index,
                    slab_symbols: step.symbols.clone(),
                    adsorbate: step.adsorbate.clone(),
                    placement: placement.kind(),
                })
            })
            .collect();
        let results = run_jobs(&self.calculator, &self.cache, jobs, self.batch_size).await?;

        let breakdowns: Vec<PathBreakdown> = paths
            .iter()
            .map(|path| {
                let energies: Vec<Option<f64>> = path
                    .iter()
                    .map(|step| {
                        results
                            .records_for(&step.adslab(), placement.indices())
                            .filter_map(|r| {
                                r.usable_energy()
                                    .map(|e| e + r.reference_energy.unwrap_or(0.0))
                            })
                            .reduce(f64::min)
                    })
                    .collect();
                PathBreakdown {
                    activation: activation_estimate(&energies),
                    energies,
                }
            })
            .collect();

        let best = breakdowns
            .iter()
            .enumerate()
            .filter(|(_, b)| b.activation.is_finite())
            .min_by(|(_, a), (_, b)| a.activation.total_cmp(&b.activation));
        let (best_index, best_value) = match best {
            Some((i, b)) => (Some(i), b.activation),
            None => {
                tracing::warn!(paths = paths.len(), "No reaction path could be evaluated");
                (None, self.penalty_value)
            }
        };
        Ok(PathEvaluation {
            best_index,
            best_value,
            paths: breakdowns,
        })
    }
}

/// Largest increase between consecutive energies; 0 for a single step and
/// infinite when any step is missing.
fn activation_estimate(energies: &[Option<f64>]) -> f64 {
    let Some(values) = energies.iter().copied().collect::<Option<Vec<f64>>>() else {
        return f64::INFINITY;
    };
    values
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .fold(0.0, f64::max)
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
    use crate::search::reward::calculator::{AdsorptionRecord, MockAdsorptionCalculator};
    use pretty_assertions::assert_eq;

    fn step(symbols: &[&str], adsorbate: &str) -> ReactionStep {
        ReactionStep {
            symbols: symbols.iter().map(ToString::to_string).collect(),
            adsorbate: adsorbate.to_string(),
            name: format!("*{adsorbate}"),
        }
    }

    #[test]
    fn test_activation_estimate() {
        assert_eq!(activation_estimate(&[Some(-1.0)]), 0.0);
        assert_eq!(activation_estimate(&[Some(-1.0), Some(0.5), Some(0.0)]), 1.5);
        assert_eq!(activation_estimate(&[Some(0.0), Some(-1.0)]), 0.0);
        assert_eq!(activation_estimate(&[Some(0.0), None]), f64::INFINITY);
    }

    #[tokio::test]
    async fn test_evaluate_paths_picks_lowest_activation() {
        let dir = tempfile::tempdir().unwrap();
        let mut calculator = MockAdsorptionCalculator::new();
        calculator.expect_relax_batch().returning(|jobs| {
            Ok(jobs
                .iter()
                .map(|job| match job.name.as_str() {
                    "Pt_CO" => AdsorptionRecord::valid(-1.0).with_reference_energy(-0.5),
                    "Pt_COH" => AdsorptionRecord::valid(0.5),
                    "Cu_CO" => AdsorptionRecord::valid(-0.5),
                    "Cu_COH" => AdsorptionRecord::valid(-0.25),
                    _ => AdsorptionRecord::invalid(),
                })
                .collect())
        });
        let reward = PathReward::new(calculator, ResultCache::new(dir.path()), 2, 4, -10.0);

        let paths = vec![
            vec![step(&["Pt"], "CO"), step(&["Pt"], "COH")],
            vec![step(&["Cu"], "CO"), step(&["Cu"], "COH")],
            vec![step(&["Au"], "CO"), step(&["Au"], "COH")],
        ];
        let evaluation = reward.evaluate_paths(&paths).await.unwrap();
        assert_eq!(evaluation.paths[0].energies, vec![Some(-1.5), Some(0.5)]);
        assert_eq!(evaluation.paths[0].activation, 2.0);
        assert_eq!(evaluation.paths[1].activation, 0.25);
        assert_eq!(evaluation.paths[2].activation, f64::INFINITY);
        assert_eq!(evaluation.best_index, Some(1));
        assert_eq!(evaluation.best_value, 0.25);
    }

    #[tokio::test]
    async fn test_all_paths_failing_returns_penalty() {
        let dir = tempfile::tempdir().unwrap();
        let mut calculator = MockAdsorptionCalculator::new();
        calculator
            .expect_relax_batch()
            .returning(|jobs| Ok(jobs.iter().map(|_| AdsorptionRecord::invalid()).collect()));
        let reward = PathReward::new(calculator, ResultCache::new(dir.path()), 1, 4, -10.0);
        let evaluation = reward
            .evaluate_paths(&[vec![step(&["Pt"], "CO")]])
            .await
            .unwrap();
        assert_eq!(evaluation.best_index, None);
        assert_eq!(evaluation.best_value, -10.0);
    }

    #[tokio::test]
    async fn test_empty_path_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let reward = PathReward::new(
            MockAdsorptionCalculator::new(),
            ResultCache::new(dir.path()),
            1,
            4,
            -10.0,
        );
        let err = reward.evaluate_paths(&[vec![]]).await.unwrap_err();
        assert!(matches!(err, RewardError::MalformedInput { .. }));
    }
}
