//! Training statistics and log file output.
//!
//! Every block of episodes is summarised as a `BlockStats`: average and best
//! score plus, for each max tile from the best one reached down to the median,
//! how often episodes got at least that far.
//!
//! When a log directory is configured the same lines are appended to
//! `training_YYYYMMDD_HHMMSS.log`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Local;
use serde::Serialize;

use crate::board::rank_to_value;
use crate::learning::LearningError;
use crate::learning::training_engine::{EpisodeResult, TrainingStats};

/// Default number of episodes per statistics block.
pub const DEFAULT_BLOCK_SIZE: u64 = 1000;

/// Reach rate of one max tile within a block.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TileRate {
    /// Tile rank
    pub rank: u8,
    /// Tile value (2^rank)
    pub tile: u32,
    /// Fraction of episodes whose max tile was at least this one
    pub reach_rate: f32,
    /// Fraction of episodes whose max tile was exactly this one
    pub exact_rate: f32,
}

/// Statistics for one block of episodes.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BlockStats {
    /// Total episodes completed so far.
    pub episodes_completed: u64,
    /// Episodes in this block.
    pub block_len: usize,
    /// Average score in this block.
    pub avg_score: f64,
    /// Best score in this block.
    pub max_score: u64,
    /// Average number of player moves per episode.
    pub avg_steps: f64,
    /// Elapsed time in seconds since training start.
    pub elapsed_secs: f64,
    /// Episodes per second throughput.
    pub episodes_per_sec: f64,
    /// Max-tile reach rates, best tile first.
    pub tile_rates: Vec<TileRate>,
}

impl BlockStats {
    /// Create block stats from the episodes of one block.
    ///
    /// # Arguments
    ///
    /// * `episodes_completed` - Total episodes completed
    /// * `episodes` - Results of the episodes in this block
    /// * `elapsed_secs` - Total elapsed time
    pub fn from_episodes(
        episodes_completed: u64,
        episodes: &[EpisodeResult],
        elapsed_secs: f64,
    ) -> Self {
        if episodes.is_empty() {
            return Self::default();
        }

        let n = episodes.len() as f64;
        let avg_score = episodes.iter().map(|e| e.score as f64).sum::<f64>() / n;
        let max_score = episodes.iter().map(|e| e.score).max().unwrap_or(0);
        let avg_steps = episodes.iter().map(|e| e.steps as f64).sum::<f64>() / n;

        let mut ranks: Vec<u8> = episodes.iter().map(|e| e.max_rank).collect();
        ranks.sort_unstable();
        let median = ranks[ranks.len() / 2];
        let best = ranks[ranks.len() - 1];

        let tile_rates = (median..=best)
            .rev()
            .map(|rank| {
                let reached = ranks.iter().filter(|&&r| r >= rank).count();
                let exact = ranks.iter().filter(|&&r| r == rank).count();
                TileRate {
                    rank,
                    tile: rank_to_value(rank),
                    reach_rate: reached as f32 / episodes.len() as f32,
                    exact_rate: exact as f32 / episodes.len() as f32,
                }
            })
            .collect();

        let episodes_per_sec = if elapsed_secs > 0.0 {
            episodes_completed as f64 / elapsed_secs
        } else {
            0.0
        };

        Self {
            episodes_completed,
            block_len: episodes.len(),
            avg_score,
            max_score,
            avg_steps,
            elapsed_secs,
            episodes_per_sec,
            tile_rates,
        }
    }

    /// One-line summary used for console logging.
    pub fn summary_line(&self) -> String {
        format!(
            "episodes={} avg={:.1} max={} steps={:.1} ({:.1} ep/s)",
            self.episodes_completed,
            self.avg_score,
            self.max_score,
            self.avg_steps,
            self.episodes_per_sec
        )
    }

    /// Tile table lines, best tile first.
    pub fn tile_lines(&self) -> Vec<String> {
        self.tile_rates
            .iter()
            .map(|rate| {
                format!(
                    "{:>6} {:>6.1}% ({:.1}%)",
                    rate.tile,
                    rate.reach_rate * 100.0,
                    rate.exact_rate * 100.0
                )
            })
            .collect()
    }
}

/// Synchronous statistics logger.
///
/// Writes directly to a timestamped file in the log directory.
pub struct StatsLogger {
    /// Buffered writer to log file.
    writer: BufWriter<File>,
    /// Training start time.
    start_time: Instant,
    /// Log file path.
    log_path: PathBuf,
}

impl StatsLogger {
    /// Create a new logger, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self, LearningError> {
        let log_dir = log_dir.as_ref().to_path_buf();

        if !log_dir.exists() {
            fs::create_dir_all(&log_dir)?;
        }

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let log_path = log_dir.join(format!("training_{}.log", timestamp));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            start_time: Instant::now(),
            log_path,
        })
    }

    fn timestamp() -> String {
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
    }

    /// Log block statistics.
    pub fn log_block(&mut self, stats: &BlockStats) -> Result<(), LearningError> {
        let ts = Self::timestamp();
        writeln!(self.writer, "[{}] BLOCK {}", ts, stats.summary_line())?;
        for line in stats.tile_lines() {
            writeln!(self.writer, "[{}]   {}", ts, line)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Log the final training summary as JSON.
    pub fn log_summary(&mut self, stats: &TrainingStats) -> Result<(), LearningError> {
        let json = serde_json::to_string(stats)?;
        writeln!(self.writer, "[{}] SUMMARY {}", Self::timestamp(), json)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Log an informational message.
    pub fn log_info(&mut self, message: &str) -> Result<(), LearningError> {
        writeln!(self.writer, "[{}] INFO: {}", Self::timestamp(), message)?;
        Ok(())
    }

    /// Log a warning.
    pub fn log_warning(&mut self, message: &str) -> Result<(), LearningError> {
        writeln!(self.writer, "[{}] WARNING: {}", Self::timestamp(), message)?;
        Ok(())
    }

    /// Get elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Get the log file path.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Flush the writer.
    pub fn flush(&mut self) -> Result<(), LearningError> {
        self.writer.flush()?;
        Ok(())
    }
}
