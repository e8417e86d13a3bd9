//! n-step TD learner with backward in-place updates.
//!
//! After an episode ends, the recorded afterstates are walked from the last one
//! back to the first and each is moved toward its n-step target.
//!
//! # Algorithm
//!
//! With history `[(r_0, s_0), ..., (r_{L-1}, s_{L-1})]`:
//! 1. `adjust(s_{L-1}, 0)`: the game is over, so the final afterstate is worth nothing.
//! 2. For `i` from `L-2` down to `0`:
//!    - `target = Σ_{j=1..=n, i+j<L} r_{i+j}`
//!    - if `i + n < L`, add `estimate(s_{i+n})`
//!    - `adjust(s_i, target)`
//! 3. `adjust(s, target)`: `error = target - estimate(s)`, then `alpha * error` is
//!    added to every active table entry of `s`.
//!
//! Weights are mutated as the walk proceeds, so a bootstrap term reads values that
//! may already have been adjusted earlier in the same pass.

use crate::board::Board;
use crate::evaluator::Evaluator;
use crate::learning::LearningError;
use crate::learning::game_history::Step;

/// Default learning rate
pub const DEFAULT_ALPHA: f32 = 0.1;

/// Default n-step horizon (classic one-step TD)
pub const DEFAULT_N_STEP: usize = 1;

/// Statistics from a TD update operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TDUpdateStats {
    /// Number of afterstates adjusted
    pub steps_processed: usize,
    /// Total table entries touched
    pub entries_updated: u64,
    /// Average absolute TD error
    pub avg_abs_error: f32,
    /// Maximum absolute TD error
    pub max_abs_error: f32,
    /// TD error of the terminal afterstate (target 0)
    pub terminal_error: f32,
}

/// n-step TD learner.
///
/// # Example
///
/// ```
/// use tiletd::board::Board;
/// use tiletd::evaluator::Evaluator;
/// use tiletd::learning::game_history::Step;
/// use tiletd::learning::td_learner::TDLearner;
/// use tiletd::pattern::NTupleConfig;
///
/// let config = NTupleConfig::from_positions(8, &[&[0, 1, 2, 3]]).unwrap();
/// let mut evaluator = Evaluator::new(config);
/// let learner = TDLearner::new(0.5, 1).unwrap();
///
/// let s0 = Board::from_ranks([1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
/// let s1 = Board::from_ranks([2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
/// let history = [Step::new(0, s0), Step::new(4, s1)];
///
/// let stats = learner.update(&history, &mut evaluator);
/// assert_eq!(stats.steps_processed, 2);
/// // s0 target = r1 + estimate(s1) = 4 + 0
/// assert_eq!(evaluator.estimate(&s0), 2.0);
/// ```
#[derive(Clone, Debug)]
pub struct TDLearner {
    /// Learning rate (0 disables learning)
    alpha: f32,
    /// Bootstrap horizon
    n_step: usize,
}

impl TDLearner {
    /// Create a learner.
    ///
    /// # Errors
    ///
    /// Returns `LearningError::Config` when `alpha` is negative or not finite,
    /// or when `n_step` is 0.
    pub fn new(alpha: f32, n_step: usize) -> Result<Self, LearningError> {
        validate_hyperparameters(alpha, n_step)?;
        Ok(Self { alpha, n_step })
    }

    /// Get the learning rate.
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Get the n-step horizon.
    pub fn n_step(&self) -> usize {
        self.n_step
    }

    /// Whether updates change any weight.
    pub fn is_learning(&self) -> bool {
        self.alpha > 0.0
    }

    /// Perform the backward update for a completed episode.
    ///
    /// No-op when the history is empty or the learning rate is 0.
    pub fn update(&self, history: &[Step], evaluator: &mut Evaluator) -> TDUpdateStats {
        let mut stats = TDUpdateStats::default();
        if history.is_empty() || !self.is_learning() {
            return stats;
        }

        let last = history.len() - 1;
        let mut total_abs_error = 0.0f32;

        let (terminal_error, touched) = self.adjust(evaluator, &history[last].after, 0.0);
        stats.terminal_error = terminal_error;
        stats.max_abs_error = terminal_error.abs();
        stats.entries_updated += touched as u64;
        total_abs_error += terminal_error.abs();

        for i in (0..last).rev() {
            let target = self.n_step_target(history, i, evaluator);
            let (error, touched) = self.adjust(evaluator, &history[i].after, target);

            total_abs_error += error.abs();
            stats.max_abs_error = stats.max_abs_error.max(error.abs());
            stats.entries_updated += touched as u64;
        }

        stats.steps_processed = history.len();
        stats.avg_abs_error = total_abs_error / history.len() as f32;

        log::debug!(
            "TD update: {} steps, avg |error| {:.4}, max |error| {:.4}, terminal error {:.4}",
            stats.steps_processed,
            stats.avg_abs_error,
            stats.max_abs_error,
            stats.terminal_error
        );

        stats
    }

    /// n-step target for history position `i` under the current weights.
    ///
    /// Sums the rewards of the next `n` steps that exist, then bootstraps off
    /// `estimate(history[i + n])` only when that step is inside the episode.
    ///
    /// # Panics
    ///
    /// If `i` is not a valid index of `history`.
    pub fn n_step_target(&self, history: &[Step], i: usize, evaluator: &Evaluator) -> f32 {
        let horizon = i.saturating_add(self.n_step);
        let end = horizon.min(history.len() - 1);

        let rewards: f32 = history[i + 1..=end]
            .iter()
            .map(|step| step.reward as f32)
            .sum();

        if horizon < history.len() {
            rewards + evaluator.estimate(&history[horizon].after)
        } else {
            rewards
        }
    }

    /// Move `estimate(board)` toward `target`.
    ///
    /// Returns the TD error measured before the update and the number of
    /// entries touched.
    pub fn adjust(&self, evaluator: &mut Evaluator, board: &Board, target: f32) -> (f32, usize) {
        let error = target - evaluator.estimate(board);
        let touched = evaluator.apply_delta(board, self.alpha * error);
        (error, touched)
    }
}

impl Default for TDLearner {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            n_step: DEFAULT_N_STEP,
        }
    }
}

/// Validate learning rate and horizon.
pub fn validate_hyperparameters(alpha: f32, n_step: usize) -> Result<(), LearningError> {
    if !alpha.is_finite() || alpha < 0.0 {
        return Err(LearningError::Config(format!(
            "alpha must be a finite non-negative number, got {}",
            alpha
        )));
    }
    if n_step == 0 {
        return Err(LearningError::Config(
            "n_step must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::NTupleConfig;

    /// Single-cell pattern so that estimate(board) == table[rank at cell 0].
    fn create_single_cell_evaluator() -> Evaluator {
        let config = NTupleConfig::from_positions(8, &[&[0]]).unwrap();
        Evaluator::new(config)
    }

    fn state(rank: u8) -> Board {
        let mut ranks = [0u8; 16];
        ranks[0] = rank;
        Board::from_ranks(ranks)
    }

    fn weight(evaluator: &Evaluator, rank: usize) -> f32 {
        evaluator.store().table(0).get(rank)
    }

    /// Three steps with rewards 0, 4, 8 on states of rank 1, 2, 3.
    fn create_test_history() -> Vec<Step> {
        vec![
            Step::new(0, state(1)),
            Step::new(4, state(2)),
            Step::new(8, state(3)),
        ]
    }

    fn seeded_evaluator() -> Evaluator {
        let mut evaluator = create_single_cell_evaluator();
        evaluator.store_mut().table_mut(0).set(2, 1.0);
        evaluator.store_mut().table_mut(0).set(3, 2.0);
        evaluator
    }

    // ========== Configuration ==========

    #[test]
    fn test_rejects_invalid_hyperparameters() {
        assert!(TDLearner::new(-0.1, 1).is_err());
        assert!(TDLearner::new(f32::NAN, 1).is_err());
        assert!(TDLearner::new(0.1, 0).is_err());
        assert!(TDLearner::new(0.0, 3).is_ok());
    }

    // ========== Degenerate cases ==========

    #[test]
    fn test_update_empty_history_is_noop() {
        let mut evaluator = seeded_evaluator();
        let learner = TDLearner::new(0.5, 1).unwrap();

        let stats = learner.update(&[], &mut evaluator);
        assert_eq!(stats, TDUpdateStats::default());
        assert_eq!(weight(&evaluator, 3), 2.0);
    }

    #[test]
    fn test_zero_alpha_leaves_weights_untouched() {
        let mut evaluator = seeded_evaluator();
        let learner = TDLearner::new(0.0, 1).unwrap();

        let stats = learner.update(&create_test_history(), &mut evaluator);
        assert_eq!(stats.steps_processed, 0);
        assert_eq!(weight(&evaluator, 1), 0.0);
        assert_eq!(weight(&evaluator, 2), 1.0);
        assert_eq!(weight(&evaluator, 3), 2.0);
    }

    // ========== Terminal state ==========

    #[test]
    fn test_terminal_state_moves_toward_zero() {
        for initial in [3.0f32, -3.0] {
            let mut evaluator = create_single_cell_evaluator();
            evaluator.store_mut().table_mut(0).set(3, initial);
            let learner = TDLearner::new(0.25, 1).unwrap();

            let before = evaluator.estimate(&state(3));
            let stats = learner.update(&[Step::new(16, state(3))], &mut evaluator);
            let after = evaluator.estimate(&state(3));

            assert_eq!(stats.terminal_error, -before);
            assert!(after.abs() < before.abs());
            assert_eq!((after - before).signum(), -before.signum());
        }
    }

    // ========== n-step targets ==========

    #[test]
    fn test_one_step_updates_in_backward_order() {
        let mut evaluator = seeded_evaluator();
        let learner = TDLearner::new(0.5, 1).unwrap();

        learner.update(&create_test_history(), &mut evaluator);

        // s2: target 0, error -2 -> 2 + 0.5 * -2 = 1
        assert_eq!(weight(&evaluator, 3), 1.0);
        // s1: target r2 + estimate(s2) = 8 + 1 (already updated), error 8 -> 1 + 4 = 5
        assert_eq!(weight(&evaluator, 2), 5.0);
        // s0: target r1 + estimate(s1) = 4 + 5, error 9 -> 4.5
        assert_eq!(weight(&evaluator, 1), 4.5);
    }

    #[test]
    fn test_two_step_truncates_at_episode_end() {
        let mut evaluator = seeded_evaluator();
        let learner = TDLearner::new(0.5, 2).unwrap();

        let stats = learner.update(&create_test_history(), &mut evaluator);

        assert_eq!(weight(&evaluator, 3), 1.0);
        // s1: window runs past the end, target is r2 alone = 8, error 7 -> 4.5
        assert_eq!(weight(&evaluator, 2), 4.5);
        // s0: target r1 + r2 + estimate(s2) = 4 + 8 + 1 = 13 -> 6.5
        assert_eq!(weight(&evaluator, 1), 6.5);

        assert_eq!(stats.steps_processed, 3);
        assert_eq!(stats.entries_updated, 3);
        assert_eq!(stats.max_abs_error, 13.0);
    }

    #[test]
    fn test_n_step_target_without_update() {
        let evaluator = seeded_evaluator();
        let history = create_test_history();

        let one = TDLearner::new(0.5, 1).unwrap();
        assert_eq!(one.n_step_target(&history, 0, &evaluator), 4.0 + 1.0);
        assert_eq!(one.n_step_target(&history, 1, &evaluator), 8.0 + 2.0);

        let long = TDLearner::new(0.5, 10).unwrap();
        assert_eq!(long.n_step_target(&history, 0, &evaluator), 12.0);
        assert_eq!(long.n_step_target(&history, 2, &evaluator), 0.0);
    }

    #[test]
    fn test_unbounded_horizon_uses_truncated_reward_sum() {
        let mut evaluator = seeded_evaluator();
        let learner = TDLearner::new(0.5, usize::MAX).unwrap();
        let history = create_test_history();

        // No bootstrap: rewards 4 + 8 of the remaining steps
        assert_eq!(learner.n_step_target(&history, 0, &evaluator), 12.0);
        assert_eq!(learner.n_step_target(&history, 1, &evaluator), 8.0);

        let stats = learner.update(&history, &mut evaluator);
        assert_eq!(stats.steps_processed, 3);
        assert!(weight(&evaluator, 1).is_finite());
    }

    #[test]
    fn test_adjust_shares_error_across_patterns() {
        let config = NTupleConfig::from_positions(8, &[&[0], &[1], &[0, 1]]).unwrap();
        let mut evaluator = Evaluator::new(config);
        let learner = TDLearner::new(0.1, 1).unwrap();
        let board = Board::from_ranks([1, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

        let (error, touched) = learner.adjust(&mut evaluator, &board, 10.0);
        assert_eq!(error, 10.0);
        assert_eq!(touched, 3);
        // 3 entries each moved by alpha * error
        assert!((evaluator.estimate(&board) - 3.0).abs() < 1e-5);
    }
}
