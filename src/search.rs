//! 手選択アルゴリズムモジュール
//!
//! ベースライン用のランダム・貪欲戦略と、学習エージェント用の
//! 期待値先読み（報酬 + タイル出現の期待値）を実装する。
//!
//! すべての戦略で同点の場合は`Direction::ALL`の列挙順で先に出た手を選ぶ。

use crate::board::{Board, Direction, Reward};
use crate::evaluator::Evaluator;

/// よく出るタイルのランク（タイル値2）
pub const COMMON_TILE_RANK: u8 = 1;

/// よく出るタイルの出現確率
pub const COMMON_TILE_PROB: f32 = 0.9;

/// まれに出るタイルのランク（タイル値4）
pub const RARE_TILE_RANK: u8 = 2;

/// まれに出るタイルの出現確率
pub const RARE_TILE_PROB: f32 = 0.1;

/// 出現しうるタイルと確率の組
pub const TILE_OUTCOMES: [(u8, f32); 2] = [
    (COMMON_TILE_RANK, COMMON_TILE_PROB),
    (RARE_TILE_RANK, RARE_TILE_PROB),
];

/// 選ばれた手
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveChoice {
    /// スライド方向
    pub direction: Direction,
    /// スライドで得た報酬
    pub reward: Reward,
    /// スライド後の盤面（タイル出現前のアフターステート）
    pub after: Board,
    /// 戦略ごとの評価値
    pub score: f32,
}

/// 合法手（盤面が変化するスライド）を列挙順に返す
///
/// # Examples
///
/// ```
/// use tiletd::board::{Board, Direction};
/// use tiletd::search::legal_moves;
///
/// let board = Board::from_ranks([1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
/// let dirs: Vec<Direction> = legal_moves(&board).map(|(dir, _, _)| dir).collect();
/// assert_eq!(dirs, vec![Direction::Right, Direction::Down]);
/// ```
pub fn legal_moves(board: &Board) -> impl Iterator<Item = (Direction, Reward, Board)> + '_ {
    Direction::ALL.into_iter().filter_map(move |dir| {
        board
            .slided(dir)
            .map(|(reward, after)| (dir, reward, after))
    })
}

/// 指定順で最初に見つかった合法手（戦略A）
///
/// 呼び出し側が順序をシャッフルして渡すことでランダム戦略になる。
pub fn first_legal(board: &Board, order: &[Direction]) -> Option<MoveChoice> {
    order.iter().find_map(|&direction| {
        board.slided(direction).map(|(reward, after)| MoveChoice {
            direction,
            reward,
            after,
            score: reward as f32,
        })
    })
}

/// 即時報酬が最大の手（戦略B）
pub fn greedy_one_ply(board: &Board) -> Option<MoveChoice> {
    let mut best: Option<MoveChoice> = None;

    for (direction, reward, after) in legal_moves(board) {
        if best.is_none_or(|b| reward > b.reward) {
            best = Some(MoveChoice {
                direction,
                reward,
                after,
                score: reward as f32,
            });
        }
    }

    best
}

/// 連続2回のスライドの報酬合計が最大になる1手目
///
/// タイル出現は考慮しない。2手目が存在する組がなければ`greedy_one_ply`に退避する。
pub fn greedy_two_ply(board: &Board) -> Option<MoveChoice> {
    let mut best: Option<(MoveChoice, Reward)> = None;

    for (direction, reward, after) in legal_moves(board) {
        for (_, second, _) in legal_moves(&after) {
            let total = reward.saturating_add(second);
            if best.is_none_or(|(_, b)| total > b) {
                let choice = MoveChoice {
                    direction,
                    reward,
                    after,
                    score: total as f32,
                };
                best = Some((choice, total));
            }
        }
    }

    match best {
        Some((choice, _)) => Some(choice),
        None => greedy_one_ply(board),
    }
}

/// 盤面から1手指したときの最良の`報酬 + 推定価値`
///
/// 合法手がない場合は`f32::NEG_INFINITY`を返す。0で代用すると
/// 行き詰まりの分岐が有限の悪い局面と区別できなくなる。
pub fn best_afterstate_value(board: &Board, evaluator: &Evaluator) -> f32 {
    legal_moves(board)
        .map(|(_, reward, after)| reward as f32 + evaluator.estimate(&after))
        .fold(f32::NEG_INFINITY, f32::max)
}

/// アフターステートの期待価値
///
/// 全空きマス × {ランク1: 0.9, ランク2: 0.1}について
/// `best_afterstate_value`を確率で重み付けし、空きマス数で割る。
/// 空きマスがなければ0。
pub fn expected_value(after: &Board, evaluator: &Evaluator) -> f32 {
    let empty = after.count_empty();
    if empty == 0 {
        return 0.0;
    }

    let mut total = 0.0f32;
    for pos in after.empty_cells() {
        for (rank, prob) in TILE_OUTCOMES {
            let mut next = *after;
            next.place(pos, rank);
            total += prob * best_afterstate_value(&next, evaluator);
        }
    }

    total / empty as f32
}

/// 報酬 + 期待価値が最大の手（戦略C、学習エージェント用）
///
/// 合法手がなければ`None`。同点は列挙順で先の手。
/// 2手目で行き詰まる分岐を含む手の評価値は負の無限大になるが、
/// 合法手が他にない場合はその手を返す。
///
/// # Examples
///
/// ```
/// use tiletd::board::{Board, Direction};
/// use tiletd::evaluator::Evaluator;
/// use tiletd::pattern::NTupleConfig;
/// use tiletd::search::lookahead;
///
/// let config = NTupleConfig::from_positions(16, &[&[0, 1, 2, 3]]).unwrap();
/// let evaluator = Evaluator::new(config);
///
/// // 中央に1枚だけ：全方向報酬0、期待値も0なので最初の手（Up）
/// let mut ranks = [0u8; 16];
/// ranks[5] = 5;
/// let choice = lookahead(&Board::from_ranks(ranks), &evaluator).unwrap();
/// assert_eq!(choice.direction, Direction::Up);
/// ```
pub fn lookahead(board: &Board, evaluator: &Evaluator) -> Option<MoveChoice> {
    let mut best: Option<MoveChoice> = None;

    for (direction, reward, after) in legal_moves(board) {
        let score = reward as f32 + expected_value(&after, evaluator);
        if best.is_none_or(|b| score > b.score) {
            best = Some(MoveChoice {
                direction,
                reward,
                after,
                score,
            });
        }
    }

    best
}
