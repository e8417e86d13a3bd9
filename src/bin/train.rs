use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use tiletd::agent::Strategy;
use tiletd::learning::{
    DEFAULT_ALPHA, DEFAULT_BLOCK_SIZE, DEFAULT_N_STEP, LearningError, TrainingConfig,
    TrainingEngine, WeightFormat,
};
use tiletd::learning::training_engine::DEFAULT_EPISODES;
use tiletd::pattern::{DEFAULT_ALPHABET, NTupleConfig};

/// Train an n-tuple value function for 2048 by n-step TD learning.
#[derive(Parser, Debug)]
#[command(name = "tiletd-train", version, about)]
struct Cli {
    /// Number of episodes to play
    #[arg(short = 'n', long, default_value_t = DEFAULT_EPISODES)]
    episodes: u64,

    /// Episodes per statistics block
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block: u64,

    /// TD learning rate (0 disables learning)
    #[arg(long, default_value_t = DEFAULT_ALPHA)]
    alpha: f32,

    /// n-step horizon
    #[arg(long = "n-step", default_value_t = DEFAULT_N_STEP)]
    n_step: usize,

    /// Player strategy: random, greedy, greedy2 or td
    #[arg(long, default_value = "td")]
    strategy: Strategy,

    /// RNG seed (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Pattern CSV (`id,positions`); the built-in 32-pattern set when omitted
    #[arg(long)]
    patterns: Option<PathBuf>,

    /// Number of distinct ranks per cell
    #[arg(long, default_value_t = DEFAULT_ALPHABET)]
    alphabet: u8,

    /// Weight file to load before training
    #[arg(long)]
    load: Option<PathBuf>,

    /// Weight file to write after training
    #[arg(long)]
    save: Option<PathBuf>,

    /// Write the headerless legacy layout instead of the versioned one
    #[arg(long)]
    legacy: bool,

    /// Gzip-compress the saved weights
    #[arg(long)]
    compress: bool,

    /// Directory for the statistics log file
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> Result<TrainingConfig, LearningError> {
        let ntuple = match &self.patterns {
            Some(path) => NTupleConfig::from_csv(self.alphabet, path)?,
            None if self.alphabet == DEFAULT_ALPHABET => NTupleConfig::default(),
            None => {
                let default = NTupleConfig::default();
                NTupleConfig::new(self.alphabet, default.patterns().to_vec())?
            }
        };

        Ok(TrainingConfig {
            episodes: self.episodes,
            block: self.block,
            alpha: self.alpha,
            n_step: self.n_step,
            seed: self.seed,
            strategy: self.strategy,
            ntuple,
            load: self.load,
            save: self.save,
            format: if self.legacy {
                WeightFormat::Legacy
            } else {
                WeightFormat::Versioned
            },
            compress: self.compress,
            log_dir: self.log_dir,
        })
    }
}

fn run(cli: Cli) -> Result<(), LearningError> {
    let config = cli.into_config()?;
    log::info!(
        "{} patterns, alphabet {}, {} weight entries ({:.1} MB)",
        config.ntuple.len(),
        config.ntuple.alphabet(),
        config.ntuple.total_entries(),
        (config.ntuple.total_entries() * std::mem::size_of::<f32>()) as f64 / (1024.0 * 1024.0)
    );

    let mut engine = TrainingEngine::new(config)?;
    let stats = engine.run()?;

    if stats.interrupted {
        log::warn!("Stopped early after {} episodes", stats.episodes_completed);
    }
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
