//! エピソード履歴記録モジュール
//!
//! 学習エージェントが1エピソード中に選んだ各手の
//! （報酬、アフターステート）の組を記録する。
//! エピソード終了時にTD更新が逆順に走査する。

use crate::board::{Board, Reward};

/// 履歴の初期容量（典型的なエピソードの手数の目安）
pub const DEFAULT_HISTORY_CAPACITY: usize = 2048;

/// 1手分の記録
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Step {
    /// この状態への遷移で得た報酬
    pub reward: Reward,
    /// スライド後、タイル出現前の盤面
    pub after: Board,
}

impl Step {
    /// 新しい記録を作成
    pub fn new(reward: Reward, after: Board) -> Self {
        Self { reward, after }
    }
}

/// エピソード履歴コンテナ
///
/// エピソード中は追記のみ。次のエピソード開始時に`clear`する。
///
/// # 例
///
/// ```
/// use tiletd::board::Board;
/// use tiletd::learning::game_history::GameHistory;
///
/// let mut history = GameHistory::new();
/// history.record(4, Board::EMPTY);
/// history.record(0, Board::EMPTY);
/// assert_eq!(history.len(), 2);
/// assert_eq!(history.total_reward(), 4);
///
/// history.clear();
/// assert!(history.is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct GameHistory {
    steps: Vec<Step>,
}

impl GameHistory {
    /// 空の履歴を作成
    pub fn new() -> Self {
        Self {
            steps: Vec::with_capacity(DEFAULT_HISTORY_CAPACITY),
        }
    }

    /// 1手を記録
    #[inline]
    pub fn record(&mut self, reward: Reward, after: Board) {
        self.steps.push(Step::new(reward, after));
    }

    /// 記録を追加
    #[inline]
    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// 全記録を破棄（容量は保持）
    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// 記録数
    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// 記録がないかどうか
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 指定番目の記録
    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// 最後の記録（終端のアフターステート）
    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// 記録順のイテレータ
    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    /// 逆順のイテレータ
    pub fn iter_reverse(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().rev()
    }

    /// スライスとして取得
    #[inline]
    pub fn as_slice(&self) -> &[Step] {
        &self.steps
    }

    /// 報酬の合計（= エピソードのスコア）
    pub fn total_reward(&self) -> u64 {
        self.steps.iter().map(|s| s.reward as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_with(rank: u8) -> Board {
        let mut ranks = [0u8; 16];
        ranks[0] = rank;
        Board::from_ranks(ranks)
    }

    #[test]
    fn test_record_preserves_order() {
        let mut history = GameHistory::new();
        for rank in 1..=5 {
            history.record(rank as Reward * 2, board_with(rank));
        }

        assert_eq!(history.len(), 5);
        assert_eq!(history.get(0).unwrap().after.cell(0), 1);
        assert_eq!(history.last().unwrap().after.cell(0), 5);

        let rewards: Vec<Reward> = history.iter().map(|s| s.reward).collect();
        assert_eq!(rewards, vec![2, 4, 6, 8, 10]);

        let reversed: Vec<u8> = history.iter_reverse().map(|s| s.after.cell(0)).collect();
        assert_eq!(reversed, vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut history = GameHistory::new();
        history.push(Step::new(8, board_with(2)));
        let capacity = history.steps.capacity();

        history.clear();
        assert!(history.is_empty());
        assert!(history.last().is_none());
        assert_eq!(history.steps.capacity(), capacity);
    }

    #[test]
    fn test_total_reward_does_not_overflow() {
        let mut history = GameHistory::new();
        history.record(u32::MAX, Board::EMPTY);
        history.record(u32::MAX, Board::EMPTY);
        assert_eq!(history.total_reward(), 2 * u32::MAX as u64);
    }
}
