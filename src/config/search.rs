//! Search-run configuration.
//!
//! Every selector is a closed enum parsed with [`FromStr`], so an unknown
//! search method, reward function or policy name is rejected when the run is
//! configured rather than when the first step executes.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

macro_rules! selector {
    (
        $(#[$meta:meta])*
        $name:ident, $var:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            /// The command-line spelling of this selector.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ConfigError::InvalidValue {
                        var: $var.into(),
                        reason: format!(
                            "unknown value '{other}', expected one of: {}",
                            [$($text),+].join(", ")
                        ),
                    }),
                }
            }
        }
    };
}

selector! {
    /// Tree-search strategy.
    SearchMethod, "search-method" {
        /// Level-by-level beam search.
        BeamSearch => "beam-search",
        /// Monte Carlo tree search.
        Mcts => "mcts",
    }
}

selector! {
    /// Reward function family.
    RewardKind, "reward-function" {
        /// Ask the reward model for adsorption energies.
        LlmReward => "llm-reward",
        /// Relax adsorbate/slab structures with a force field.
        SimulationReward => "simulation-reward",
    }
}

selector! {
    /// Action-generation policy.
    PolicyKind, "policy" {
        /// Fixed action catalogue with heuristic priors.
        ReasonerPolicy => "reasoner-policy",
        /// Catalogue re-weighted by embedding similarity.
        CoherentPolicy => "coherent-policy",
    }
}

selector! {
    /// Which end of the reward scale is better.
    RewardPolarity, "reward-polarity" {
        /// Larger rewards win.
        HigherIsBetter => "higher-is-better",
        /// Smaller rewards win.
        LowerIsBetter => "lower-is-better",
    }
}

selector! {
    /// Device the force-field model runs on.
    GnnDevice, "gnn-device" {
        /// Host CPU.
        Cpu => "cpu",
        /// CUDA GPU.
        Cuda => "cuda",
    }
}

selector! {
    /// How adsorbates are placed on slabs.
    PlacementKind, "placement" {
        /// A fixed number of random placements.
        Random => "random",
        /// Enumerated heuristic adsorption sites.
        Heuristic => "heuristic",
    }
}

impl Default for RewardPolarity {
    fn default() -> Self {
        Self::HigherIsBetter
    }
}

impl RewardPolarity {
    /// Returns true if reward `a` ranks strictly ahead of reward `b`.
    #[must_use]
    pub fn prefers(self, a: f64, b: f64) -> bool {
        match self {
            Self::HigherIsBetter => a > b,
            Self::LowerIsBetter => a < b,
        }
    }
}

/// Configuration of one search run.
///
/// Built from command-line flags and checked once by
/// [`validate_search_config`](super::validate_search_config).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    /// Tree-search strategy.
    pub method: SearchMethod,
    /// Reward function family.
    pub reward: RewardKind,
    /// Action policy.
    pub policy: PolicyKind,
    /// Nodes retained per beam level.
    pub num_keep: usize,
    /// Actions expanded per node.
    pub num_generate: usize,
    /// Target number of levels (beam) or rewards backed up to the root (MCTS).
    pub depth: usize,
    /// Reward assigned when evaluation fails. Must be negative.
    pub penalty_value: f64,
    /// Reward evaluation attempts before the penalty applies.
    pub reward_max_attempts: u32,
    /// Largest acceptable aggregated energy for the LLM reward.
    pub reward_limit: f64,
    /// Which end of the reward scale is better.
    pub polarity: RewardPolarity,
    /// MCTS exploration constant.
    pub exploration_constant: f64,
    /// MCTS discount applied per level during backup.
    pub discount_factor: f64,
    /// Force-field model name.
    pub gnn_model: String,
    /// Relaxations per calculator batch.
    pub gnn_batch_size: usize,
    /// Force-field device.
    pub gnn_device: GnnDevice,
    /// Force convergence threshold.
    pub gnn_fmax: f64,
    /// Maximum relaxation steps.
    pub gnn_steps: u32,
    /// External relaxation command.
    pub gnn_command: Option<String>,
    /// Placements (random) or sites (heuristic) per adsorbate/slab pair.
    pub num_adslab_samples: usize,
    /// Adsorbate placement strategy.
    pub placement: PlacementKind,
    /// Root of the on-disk relaxation result cache.
    pub traj_dir: PathBuf,
    /// Softmax temperature of the coherent policy.
    pub temperature: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            method: SearchMethod::BeamSearch,
            reward: RewardKind::LlmReward,
            policy: PolicyKind::ReasonerPolicy,
            num_keep: 6,
            num_generate: 8,
            depth: 5,
            penalty_value: -10.0,
            reward_max_attempts: 3,
            reward_limit: 10.0,
            polarity: RewardPolarity::HigherIsBetter,
            exploration_constant: 1.0,
            discount_factor: 1.0,
            gnn_model: "gemnet".into(),
            gnn_batch_size: 40,
            gnn_device: GnnDevice::Cpu,
            gnn_fmax: 0.05,
            gnn_steps: 64,
            gnn_command: None,
            num_adslab_samples: 16,
            placement: PlacementKind::Random,
            traj_dir: PathBuf::from("data/output/trajectories"),
            temperature: 0.6,
        }
    }
}
