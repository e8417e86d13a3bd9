//! Learning system: n-step TD training of the n-tuple value function.
//!
//! # Architecture
//!
//! ```text
//! TrainingEngine
//!     |-- Agent::Environment (RandomEnvironment)
//!     |-- Agent::Learner (TdPlayer)
//!     |       |-- search::lookahead
//!     |       |-- GameHistory
//!     |       |-- TDLearner (backward update at episode end)
//!     |-- WeightFile (load / save)
//!     |-- StatsLogger
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tiletd::learning::{TrainingConfig, TrainingEngine};
//!
//! let config = TrainingConfig::default();
//! let mut engine = TrainingEngine::new(config)?;
//! let stats = engine.run()?;
//! println!("best score: {}", stats.best_score);
//! # Ok::<(), tiletd::learning::LearningError>(())
//! ```

use crate::pattern::PatternError;
use thiserror::Error;

// Submodules
pub mod checkpoint;
pub mod game_history;
pub mod logger;
pub mod td_learner;
pub mod training_engine;

// Re-export public types
pub use checkpoint::{
    FLAG_COMPRESSED, WEIGHT_FILE_MAGIC, WEIGHT_FILE_VERSION, WeightFile, WeightFormat,
    WeightHeader, load_weights, save_weights, save_weights_with_retry,
    save_weights_with_retry_after,
};
pub use error::LearningError;
pub use game_history::{GameHistory, Step};
pub use logger::{BlockStats, DEFAULT_BLOCK_SIZE, StatsLogger};
pub use td_learner::{DEFAULT_ALPHA, DEFAULT_N_STEP, TDLearner, TDUpdateStats};
pub use training_engine::{
    EpisodeResult, TrainingConfig, TrainingEngine, TrainingStats, setup_signal_handler,
};

/// Error types for the learning module
mod error {
    use super::*;

    /// Learning system error type
    ///
    /// # Recovery Strategies
    ///
    /// | Variant | Recovery |
    /// |---------|----------|
    /// | `Io` | Retry once for saves; fatal for loads |
    /// | `InvalidCheckpoint` | Fatal: never play with a partially loaded store |
    /// | `Pattern` | Fatal: fix the pattern file or alphabet |
    /// | `Config` | Report configuration issue, abort |
    /// | `Serialization` | Report, the weights are unaffected |
    #[derive(Error, Debug)]
    pub enum LearningError {
        /// I/O errors (weight file, log file)
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),

        /// Weight file corruption or layout mismatch
        ///
        /// Occurs when loading a weight file with:
        /// - Invalid magic header or unknown version
        /// - Table count or n-tuple configuration different from the running one
        /// - Truncated data or checksum mismatch
        #[error("Invalid checkpoint: {0}")]
        InvalidCheckpoint(String),

        /// Pattern definition error
        #[error("Pattern error: {0}")]
        Pattern(#[from] PatternError),

        /// Configuration error
        ///
        /// Occurs when configuration values are invalid:
        /// - Negative or non-finite learning rate
        /// - n-step horizon of 0
        /// - Zero episodes or block size
        #[error("Configuration error: {0}")]
        Config(String),

        /// Statistics serialization error
        #[error("Serialization error: {0}")]
        Serialization(#[from] serde_json::Error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let learning_err: LearningError = io_err.into();

        match learning_err {
            LearningError::Io(_) => {}
            _ => panic!("Expected Io variant"),
        }
    }

    #[test]
    fn test_pattern_error_conversion() {
        let learning_err: LearningError = PatternError::InvalidPosition(16).into();
        assert!(matches!(learning_err, LearningError::Pattern(_)));
        assert!(learning_err.to_string().contains("16"));
    }

    #[test]
    fn test_invalid_checkpoint_error() {
        let err = LearningError::InvalidCheckpoint("bad magic".to_string());
        assert!(err.to_string().contains("checkpoint"));
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn test_config_error() {
        let err = LearningError::Config("n_step must be at least 1".to_string());
        assert!(err.to_string().contains("Configuration"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<LearningError>();
        assert_sync::<LearningError>();
    }
}
