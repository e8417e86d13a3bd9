//! Episode driver for n-tuple TD training.
//!
//! Each episode starts from an empty board on which the environment places two
//! tiles. The player and the environment then alternate until the player has
//! no legal slide. At the end of every episode both agents are closed, which
//! for the TD player runs the backward update over the recorded history.
//!
//! # Architecture
//!
//! ```text
//! TrainingEngine
//!     |-- Agent::Environment (tile placement)
//!     |-- Agent::Learner / Agent::Player (slide selection)
//!     |-- StatsLogger (optional block log file)
//!     |-- ctrlc flag (stop after the current episode)
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use serde::Serialize;

use crate::agent::{Agent, AgentConfig, Strategy};
use crate::board::{Board, rank_to_value};
use crate::evaluator::Evaluator;
use crate::learning::LearningError;
use crate::learning::checkpoint::{WeightFile, WeightFormat, save_weights_with_retry};
use crate::learning::logger::{BlockStats, DEFAULT_BLOCK_SIZE, StatsLogger};
use crate::learning::td_learner::{DEFAULT_ALPHA, DEFAULT_N_STEP, validate_hyperparameters};
use crate::pattern::NTupleConfig;

/// Default number of training episodes.
pub const DEFAULT_EPISODES: u64 = 100_000;

/// Tiles placed by the environment before the first slide.
pub const INITIAL_TILES: usize = 2;

/// Global interrupt flag shared by all TrainingEngine instances.
/// The ctrlc handler can be registered only once per process.
static GLOBAL_INTERRUPTED: OnceLock<Result<Arc<AtomicBool>, String>> = OnceLock::new();

/// Setup the global Ctrl-C handler.
///
/// Safe to call multiple times: the handler is registered once and every call
/// returns the same flag, set to true when SIGINT is received.
pub fn setup_signal_handler() -> Result<Arc<AtomicBool>, LearningError> {
    let result = GLOBAL_INTERRUPTED.get_or_init(|| {
        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = Arc::clone(&flag);

        ctrlc::set_handler(move || {
            flag_clone.store(true, Ordering::SeqCst);
        })
        .map(|_| flag)
        .map_err(|e| format!("Failed to set signal handler: {}", e))
    });

    match result {
        Ok(flag) => Ok(Arc::clone(flag)),
        Err(e) => Err(LearningError::Config(e.clone())),
    }
}

/// Training configuration.
#[derive(Clone, Debug)]
pub struct TrainingConfig {
    /// Number of episodes to play (default: 100,000).
    pub episodes: u64,
    /// Episodes per statistics block (default: 1,000).
    pub block: u64,
    /// TD learning rate; 0 disables learning.
    pub alpha: f32,
    /// n-step horizon (at least 1).
    pub n_step: usize,
    /// RNG seed; None draws from the OS.
    pub seed: Option<u64>,
    /// Player strategy.
    pub strategy: Strategy,
    /// N-tuple configuration.
    pub ntuple: NTupleConfig,
    /// Weight file to load before training.
    pub load: Option<PathBuf>,
    /// Weight file written at the end of training.
    pub save: Option<PathBuf>,
    /// Layout used for `save`.
    pub format: WeightFormat,
    /// Gzip-compress the saved body (versioned layout only).
    pub compress: bool,
    /// Directory for the block statistics log file.
    pub log_dir: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            episodes: DEFAULT_EPISODES,
            block: DEFAULT_BLOCK_SIZE,
            alpha: DEFAULT_ALPHA,
            n_step: DEFAULT_N_STEP,
            seed: None,
            strategy: Strategy::Td,
            ntuple: NTupleConfig::default(),
            load: None,
            save: None,
            format: WeightFormat::default(),
            compress: false,
            log_dir: None,
        }
    }
}

impl TrainingConfig {
    /// Check episode counts and learning hyperparameters.
    pub fn validate(&self) -> Result<(), LearningError> {
        if self.episodes == 0 {
            return Err(LearningError::Config(
                "episodes must be at least 1".to_string(),
            ));
        }
        if self.block == 0 {
            return Err(LearningError::Config(
                "block size must be at least 1".to_string(),
            ));
        }
        validate_hyperparameters(self.alpha, self.n_step)
    }

    /// Player configuration derived from this training configuration.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            // Offset so the player never mirrors the environment's stream
            seed: self.seed.map(|s| s.wrapping_add(1)),
            alpha: self.alpha,
            n_step: self.n_step,
            load: self.load.clone(),
            save: self.save.clone(),
            strategy: self.strategy,
            ntuple: self.ntuple.clone(),
            weight_file: WeightFile::new(self.format).with_compression(self.compress),
        }
    }
}

/// Outcome of one episode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EpisodeResult {
    /// Sum of slide rewards.
    pub score: u64,
    /// Highest rank on the final board.
    pub max_rank: u8,
    /// Number of player slides.
    pub steps: usize,
}

/// Training statistics summary.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TrainingStats {
    /// Total episodes completed.
    pub episodes_completed: u64,
    /// Total elapsed time in seconds.
    pub elapsed_secs: f64,
    /// Overall episodes per second.
    pub episodes_per_sec: f64,
    /// Average score over all episodes.
    pub avg_score: f64,
    /// Best score of any episode.
    pub best_score: u64,
    /// Largest tile value reached.
    pub best_tile: u32,
    /// Whether the run stopped early on Ctrl-C.
    pub interrupted: bool,
}

/// Main training engine.
pub struct TrainingEngine {
    config: TrainingConfig,
    environment: Agent,
    player: Agent,
    logger: Option<StatsLogger>,
    episode_count: u64,
    total_score: u64,
    best_score: u64,
    best_rank: u8,
    block_results: Vec<EpisodeResult>,
    last_block: Option<BlockStats>,
    start_time: Instant,
    interrupted: Arc<AtomicBool>,
}

impl TrainingEngine {
    /// Initialize the engine.
    ///
    /// # Errors
    ///
    /// - `LearningError::Config` for invalid counts or hyperparameters
    /// - `LearningError::Io` / `InvalidCheckpoint` if `load` cannot be read
    /// - `LearningError::Io` if the log directory cannot be created
    pub fn new(config: TrainingConfig) -> Result<Self, LearningError> {
        config.validate()?;

        let environment = Agent::environment(config.seed);
        let player = Agent::player(&config.agent_config())?;

        let logger = match &config.log_dir {
            Some(dir) => Some(StatsLogger::new(dir)?),
            None => None,
        };

        // Setup interrupt handler (uses global OnceLock for single registration)
        let interrupted = setup_signal_handler()?;

        Ok(Self {
            block_results: Vec::with_capacity(config.block.min(DEFAULT_BLOCK_SIZE) as usize),
            config,
            environment,
            player,
            logger,
            episode_count: 0,
            total_score: 0,
            best_score: 0,
            best_rank: 0,
            last_block: None,
            start_time: Instant::now(),
            interrupted,
        })
    }

    /// Play the configured number of episodes, then save the weights.
    ///
    /// A Ctrl-C stops the loop after the current episode; the weights are
    /// still saved and the returned stats are marked `interrupted`.
    pub fn run(&mut self) -> Result<TrainingStats, LearningError> {
        let start_message = format!(
            "Starting training: {} episodes, player {}, alpha {}, n_step {}",
            self.config.episodes,
            self.player.name(),
            self.config.alpha,
            self.config.n_step
        );
        log::info!("{}", start_message);
        if let Some(logger) = self.logger.as_mut() {
            logger.log_info(&start_message)?;
        }

        let mut interrupted = false;
        while self.episode_count < self.config.episodes {
            if self.is_interrupted() {
                log::warn!(
                    "Training interrupted after {} episodes",
                    self.episode_count
                );
                if let Some(logger) = self.logger.as_mut() {
                    logger.log_warning("Training interrupted by signal")?;
                }
                interrupted = true;
                break;
            }

            let result = self.play_episode();
            self.record(result);

            if self.block_results.len() as u64 >= self.config.block {
                self.report_block()?;
            }
        }

        if !self.block_results.is_empty() {
            self.report_block()?;
        }

        self.save()?;

        let stats = self.training_stats(interrupted);
        log::info!(
            "Training finished: {} episodes, avg {:.1}, best {} ({:.2} ep/s)",
            stats.episodes_completed,
            stats.avg_score,
            stats.best_score,
            stats.episodes_per_sec
        );
        if let Some(logger) = self.logger.as_mut() {
            logger.log_summary(&stats)?;
        }

        Ok(stats)
    }

    /// Play one episode and close it on both agents.
    pub fn play_episode(&mut self) -> EpisodeResult {
        let mut board = Board::EMPTY;
        self.environment.open_episode();
        self.player.open_episode();

        for _ in 0..INITIAL_TILES {
            let placement = self.environment.take_action(&board);
            placement.apply(&mut board);
        }

        let mut score = 0u64;
        let mut steps = 0usize;
        loop {
            let slide = self.player.take_action(&board);
            let Some(reward) = slide.apply(&mut board) else {
                break;
            };
            score += u64::from(reward);
            steps += 1;

            let placement = self.environment.take_action(&board);
            if placement.apply(&mut board).is_none() {
                break;
            }
        }

        self.environment.close_episode();
        self.player.close_episode();

        let result = EpisodeResult {
            score,
            max_rank: board.max_rank(),
            steps,
        };
        log::debug!(
            "Episode {}: score {} max tile {} steps {}",
            self.episode_count + 1,
            result.score,
            rank_to_value(result.max_rank),
            result.steps
        );
        result
    }

    fn record(&mut self, result: EpisodeResult) {
        self.episode_count += 1;
        self.total_score += result.score;
        self.best_score = self.best_score.max(result.score);
        self.best_rank = self.best_rank.max(result.max_rank);
        self.block_results.push(result);
    }

    fn report_block(&mut self) -> Result<(), LearningError> {
        let stats = BlockStats::from_episodes(
            self.episode_count,
            &self.block_results,
            self.elapsed_secs(),
        );

        log::info!("{}", stats.summary_line());
        for line in stats.tile_lines() {
            log::info!("  {}", line);
        }
        if let Some(logger) = self.logger.as_mut() {
            logger.log_block(&stats)?;
        }

        self.block_results.clear();
        self.last_block = Some(stats);
        Ok(())
    }

    /// Save the player's weights when a save path is configured.
    fn save(&self) -> Result<(), LearningError> {
        let Some(learner) = self.player.as_learner() else {
            return Ok(());
        };
        save_weights_with_retry(|| learner.save_weights().map(|_| ()))
    }

    fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    fn training_stats(&self, interrupted: bool) -> TrainingStats {
        let elapsed = self.elapsed_secs();
        let per_episode = |total: f64| {
            if self.episode_count > 0 {
                total / self.episode_count as f64
            } else {
                0.0
            }
        };

        TrainingStats {
            episodes_completed: self.episode_count,
            elapsed_secs: elapsed,
            episodes_per_sec: if elapsed > 0.0 {
                self.episode_count as f64 / elapsed
            } else {
                0.0
            },
            avg_score: per_episode(self.total_score as f64),
            best_score: self.best_score,
            best_tile: if self.best_rank > 0 {
                rank_to_value(self.best_rank)
            } else {
                0
            },
            interrupted,
        }
    }

    /// Episodes completed so far.
    pub fn episode_count(&self) -> u64 {
        self.episode_count
    }

    /// Statistics of the most recently reported block.
    pub fn last_block(&self) -> Option<&BlockStats> {
        self.last_block.as_ref()
    }

    /// The player agent.
    pub fn player(&self) -> &Agent {
        &self.player
    }

    /// The learner's value function, if the player learns.
    pub fn evaluator(&self) -> Option<&Evaluator> {
        self.player.as_learner().map(|learner| learner.evaluator())
    }

    /// Path of the block log file, if one is written.
    pub fn log_path(&self) -> Option<&std::path::Path> {
        self.logger.as_ref().map(|logger| logger.log_path())
    }

    /// Check if training was interrupted.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}
