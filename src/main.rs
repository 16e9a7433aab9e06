//! Catalyst search binary entry point.
//!
//! Runs one search per dataset row and checkpoints every step to
//! `{savedir}/search_tree_{i}.json`. All logs go to stderr.
//!
//! Coverage is excluded because the main function needs a live model API.

// Enable the coverage attribute when running with nightly for llvm-cov exclusions
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser};
use tracing_subscriber::filter::EnvFilter;

use catalyst_search::config::{
    validate_search_config, Config, GnnDevice, PlacementKind, PolicyKind, RewardKind,
    RewardPolarity, SearchConfig, SearchMethod,
};
use catalyst_search::dataset::{load_dataset, make_state};
use catalyst_search::driver::{build_policy, build_reward, checkpoint_path, search_item};
use catalyst_search::error::AppError;
use catalyst_search::llm::{ClientConfig, LlmClient};

/// Language-model guided catalyst search.
#[derive(Parser, Debug)]
#[command(name = "catalyst-search", version, about)]
struct Cli {
    /// JSON dataset of search queries.
    #[arg(long, value_name = "PATH")]
    dataset_path: PathBuf,

    /// Directory receiving one checkpoint per query.
    #[arg(long, value_name = "PATH", default_value = "data/output")]
    savedir: PathBuf,

    /// First dataset row to search.
    #[arg(long, default_value_t = 0)]
    start_query: usize,

    /// Row after the last one to search; all rows when absent.
    #[arg(long)]
    end_query: Option<usize>,

    /// Tree-search strategy.
    #[arg(long, default_value_t = SearchMethod::BeamSearch)]
    search_method: SearchMethod,

    /// Reward function.
    #[arg(long, default_value_t = RewardKind::LlmReward)]
    reward_function: RewardKind,

    /// Action policy.
    #[arg(long, default_value_t = PolicyKind::ReasonerPolicy)]
    policy: PolicyKind,

    /// Nodes kept per beam level.
    #[arg(long, default_value_t = 6)]
    num_keep: usize,

    /// Actions expanded per node.
    #[arg(long, default_value_t = 8)]
    num_generate: usize,

    /// Levels (beam) or root backups (MCTS) to reach.
    #[arg(long, default_value_t = 5)]
    depth: usize,

    /// Reward assigned when evaluation fails.
    #[arg(long, default_value_t = -10.0, allow_negative_numbers = true)]
    penalty_value: f64,

    /// Reward attempts before the penalty applies.
    #[arg(long, default_value_t = 3)]
    reward_max_attempts: u32,

    /// Largest acceptable aggregated LLM energy.
    #[arg(long, default_value_t = 10.0)]
    reward_limit: f64,

    /// Which end of the reward scale is better.
    #[arg(long, default_value_t = RewardPolarity::HigherIsBetter)]
    reward_polarity: RewardPolarity,

    /// MCTS exploration constant.
    #[arg(long, default_value_t = 1.0)]
    exploration_constant: f64,

    /// MCTS per-level discount.
    #[arg(long, default_value_t = 1.0)]
    discount_factor: f64,

    /// Force-field model name.
    #[arg(long, default_value = "gemnet")]
    gnn_model: String,

    /// Relaxations per batch.
    #[arg(long, default_value_t = 40)]
    gnn_batch_size: usize,

    /// Force-field device.
    #[arg(long, default_value_t = GnnDevice::Cpu)]
    gnn_device: GnnDevice,

    /// Force convergence threshold.
    #[arg(long, default_value_t = 0.05)]
    gnn_fmax: f64,

    /// Maximum relaxation steps.
    #[arg(long, default_value_t = 64)]
    gnn_steps: u32,

    /// Relaxation command, required by the simulation reward.
    #[arg(long, value_name = "COMMAND")]
    gnn_command: Option<String>,

    /// Placements or sites per adsorbate/slab pair.
    #[arg(long, default_value_t = 16)]
    num_adslab_samples: usize,

    /// Adsorbate placement strategy.
    #[arg(long, default_value_t = PlacementKind::Random)]
    placement: PlacementKind,

    /// Relaxation result cache.
    #[arg(long, value_name = "PATH", default_value = "data/output/trajectories")]
    traj_dir: PathBuf,

    /// Coherent-policy softmax temperature.
    #[arg(long, default_value_t = 0.6)]
    temperature: f64,

    /// Raise log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn search_config(&self) -> SearchConfig {
        SearchConfig {
            method: self.search_method,
            reward: self.reward_function,
            policy: self.policy,
            num_keep: self.num_keep,
            num_generate: self.num_generate,
            depth: self.depth,
            penalty_value: self.penalty_value,
            reward_max_attempts: self.reward_max_attempts,
            reward_limit: self.reward_limit,
            polarity: self.reward_polarity,
            exploration_constant: self.exploration_constant,
            discount_factor: self.discount_factor,
            gnn_model: self.gnn_model.clone(),
            gnn_batch_size: self.gnn_batch_size,
            gnn_device: self.gnn_device,
            gnn_fmax: self.gnn_fmax,
            gnn_steps: self.gnn_steps,
            gnn_command: self.gnn_command.clone(),
            num_adslab_samples: self.num_adslab_samples,
            placement: self.placement,
            traj_dir: self.traj_dir.clone(),
            temperature: self.temperature,
        }
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|level| level.parse::<EnvFilter>().ok())
            .unwrap_or_else(|| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

/// Run every selected row; returns the number of halted rows.
async fn run(cli: &Cli) -> Result<usize, AppError> {
    let config = Config::from_env()?;
    let search_config = cli.search_config();
    validate_search_config(&search_config)?;

    let client = Arc::new(LlmClient::new(
        config.api_key.clone(),
        ClientConfig::from_config(&config),
    )?);
    // Fail on a missing relaxation command before any row starts.
    build_reward(&search_config, &client, &config.reward_model)?;

    let rows = load_dataset(&cli.dataset_path)?;
    let end = cli.end_query.unwrap_or(rows.len()).min(rows.len());
    tracing::info!(
        method = %search_config.method,
        reward = %search_config.reward,
        policy = %search_config.policy,
        start = cli.start_query,
        end,
        "Starting catalyst search"
    );

    let mut halted = 0;
    for index in cli.start_query..end {
        let path = checkpoint_path(&cli.savedir, index);
        let root = match make_state(&rows[index], &config.prediction_model, &config.reward_model) {
            Ok(root) => root,
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping row");
                halted += 1;
                continue;
            }
        };
        let policy = build_policy(&search_config, &client);
        let reward_fn = build_reward(&search_config, &client, &config.reward_model)?;
        // A configuration mismatch applies to every remaining row.
        let outcome = search_item(&search_config, root, policy, reward_fn, &path).await?;
        if outcome.is_halted() {
            halted += 1;
        }
        tracing::info!(index, outcome = ?outcome, "Row finished");
    }

    let usage = client.usage_snapshot();
    tracing::info!(
        queries = usage.queries,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        halted,
        "Catalyst search complete"
    );
    Ok(halted)
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    tracing::info!("catalyst-search starting...");

    match run(&cli).await {
        Ok(0) => {}
        Ok(halted) => tracing::warn!(halted, "Some searches halted before reaching the target depth"),
        Err(AppError::Config(e)) => {
            tracing::error!("Configuration error: {e}");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    }
}
