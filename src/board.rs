//! 4×4盤面表現とスライド操作
//!
//! 各マスはタイルのランク（0=空、rならタイル値2^r）を保持する。
//! 位置は行優先で0-15（位置 = 行 × 4 + 列）。

use std::fmt;

/// 盤面のマス数
pub const BOARD_CELLS: usize = 16;

/// 盤面の一辺の長さ
pub const BOARD_SIZE: usize = 4;

/// スライドで得られる報酬（合体で生成されたタイル値の合計）
pub type Reward = u32;

/// スライド方向
///
/// 列挙順（Up, Right, Down, Left）は全戦略の同点時の優先順位でもある。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    /// 上
    Up = 0,
    /// 右
    Right = 1,
    /// 下
    Down = 2,
    /// 左
    Left = 3,
}

impl Direction {
    /// 列挙順の全方向
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Right,
        Direction::Down,
        Direction::Left,
    ];

    /// オペコード（0-3）を返す
    #[inline]
    pub fn opcode(self) -> u8 {
        self as u8
    }

    /// オペコードから方向を復元
    ///
    /// # Examples
    ///
    /// ```
    /// use tiletd::board::Direction;
    ///
    /// assert_eq!(Direction::from_opcode(3), Some(Direction::Left));
    /// assert_eq!(Direction::from_opcode(4), None);
    /// ```
    pub fn from_opcode(op: u8) -> Option<Self> {
        Self::ALL.get(op as usize).copied()
    }

    /// 表示用の名前
    pub fn name(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Right => "right",
            Direction::Down => "down",
            Direction::Left => "left",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// ランクをタイル値に変換（0は空マス）
#[inline]
pub fn rank_to_value(rank: u8) -> u32 {
    if rank == 0 { 0 } else { 1u32 << rank }
}

/// 2048盤面
///
/// `Copy`なので、探索で仮の局面を作るときは値コピーで分岐させる。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Board {
    /// 行優先のランク配列
    cells: [u8; BOARD_CELLS],
}

impl Board {
    /// 空の盤面
    pub const EMPTY: Board = Board {
        cells: [0; BOARD_CELLS],
    };

    /// ランク配列から盤面を作成
    ///
    /// # Examples
    ///
    /// ```
    /// use tiletd::board::Board;
    ///
    /// let board = Board::from_ranks([1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
    /// assert_eq!(board.cell(15), 2);
    /// assert_eq!(board.count_empty(), 13);
    /// ```
    pub fn from_ranks(cells: [u8; BOARD_CELLS]) -> Self {
        Self { cells }
    }

    /// ランク配列を返す
    #[inline]
    pub fn ranks(&self) -> &[u8; BOARD_CELLS] {
        &self.cells
    }

    /// 指定位置のランクを取得
    ///
    /// # Panics
    ///
    /// `pos`が16以上の場合
    #[inline]
    pub fn cell(&self, pos: usize) -> u8 {
        self.cells[pos]
    }

    /// 指定位置にタイルを置く
    ///
    /// # Panics
    ///
    /// `pos`が16以上の場合
    #[inline]
    pub fn place(&mut self, pos: usize, rank: u8) {
        self.cells[pos] = rank;
    }

    /// 空マスの位置を列挙
    pub fn empty_cells(&self) -> impl Iterator<Item = usize> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, rank)| **rank == 0)
            .map(|(pos, _)| pos)
    }

    /// 空マス数
    #[inline]
    pub fn count_empty(&self) -> usize {
        self.cells.iter().filter(|&&rank| rank == 0).count()
    }

    /// 盤面上の最大ランク
    #[inline]
    pub fn max_rank(&self) -> u8 {
        self.cells.iter().copied().max().unwrap_or(0)
    }

    /// 盤面上の最大タイル値
    #[inline]
    pub fn max_tile(&self) -> u32 {
        rank_to_value(self.max_rank())
    }

    /// 指定方向にスライドする
    ///
    /// 盤面が変化しなかった場合は`None`を返し、盤面はそのまま。
    /// 変化した場合は合体で生成されたタイル値の合計を返す（合体なしなら0）。
    ///
    /// # Examples
    ///
    /// ```
    /// use tiletd::board::{Board, Direction};
    ///
    /// let mut board = Board::from_ranks([1, 1, 2, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    /// assert_eq!(board.slide(Direction::Left), Some(4 + 8));
    /// assert_eq!(&board.ranks()[..4], &[2, 3, 0, 0]);
    ///
    /// // 左にはもう動かない
    /// assert_eq!(board.slide(Direction::Left), None);
    /// ```
    pub fn slide(&mut self, dir: Direction) -> Option<Reward> {
        let before = self.cells;
        let mut reward: Reward = 0;

        for line in 0..BOARD_SIZE {
            let indices = line_indices(dir, line);
            let mut tiles = indices.map(|i| self.cells[i]);
            reward = reward.saturating_add(merge_line(&mut tiles));
            for (i, tile) in indices.into_iter().zip(tiles) {
                self.cells[i] = tile;
            }
        }

        if self.cells == before {
            None
        } else {
            Some(reward)
        }
    }

    /// スライド後の盤面と報酬を返す（元の盤面は変更しない）
    #[inline]
    pub fn slided(&self, dir: Direction) -> Option<(Reward, Board)> {
        let mut after = *self;
        after.slide(dir).map(|reward| (reward, after))
    }

    /// どの方向にも動けない場合true
    pub fn is_terminal(&self) -> bool {
        Direction::ALL
            .iter()
            .all(|&dir| self.slided(dir).is_none())
    }
}

/// スライド方向の先頭から並べた1ライン分のマス位置
#[inline]
fn line_indices(dir: Direction, line: usize) -> [usize; BOARD_SIZE] {
    match dir {
        Direction::Left => [line * 4, line * 4 + 1, line * 4 + 2, line * 4 + 3],
        Direction::Right => [line * 4 + 3, line * 4 + 2, line * 4 + 1, line * 4],
        Direction::Up => [line, line + 4, line + 8, line + 12],
        Direction::Down => [line + 12, line + 8, line + 4, line],
    }
}

/// 1ラインを先頭方向に詰めて合体させる
///
/// 各タイルは1回のスライドで高々1回しか合体しない。
fn merge_line(tiles: &mut [u8; BOARD_SIZE]) -> Reward {
    let mut out = [0u8; BOARD_SIZE];
    let mut top = 0;
    let mut hold = 0u8;
    let mut reward: Reward = 0;

    for &tile in tiles.iter() {
        if tile == 0 {
            continue;
        }
        if hold == 0 {
            hold = tile;
        } else if hold == tile {
            let merged = tile + 1;
            out[top] = merged;
            top += 1;
            reward = reward.saturating_add(rank_to_value(merged));
            hold = 0;
        } else {
            out[top] = hold;
            top += 1;
            hold = tile;
        }
    }
    if hold != 0 {
        out[top] = hold;
    }

    *tiles = out;
    reward
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Board({:?})", self.cells)
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "+------------------------+")?;
        for row in self.cells.chunks(BOARD_SIZE) {
            write!(f, "|")?;
            for &rank in row {
                write!(f, "{:>6}", rank_to_value(rank))?;
            }
            writeln!(f, "|")?;
        }
        write!(f, "+------------------------+")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: [u8; 4]) -> Board {
        let mut ranks = [0u8; 16];
        ranks[..4].copy_from_slice(&cells);
        Board::from_ranks(ranks)
    }

    #[test]
    fn test_merge_line() {
        let mut line = [1, 1, 2, 2];
        assert_eq!(merge_line(&mut line), 12);
        assert_eq!(line, [2, 3, 0, 0]);

        let mut line = [1, 2, 1, 2];
        assert_eq!(merge_line(&mut line), 0);
        assert_eq!(line, [1, 2, 1, 2]);

        let mut line = [1, 0, 0, 1];
        assert_eq!(merge_line(&mut line), 4);
        assert_eq!(line, [2, 0, 0, 0]);

        // 3枚同じ場合は先頭側の2枚だけが合体する
        let mut line = [2, 2, 2, 0];
        assert_eq!(merge_line(&mut line), 8);
        assert_eq!(line, [3, 2, 0, 0]);

        // 合体後のタイルは同じスライド内で再合体しない
        let mut line = [2, 2, 3, 0];
        assert_eq!(merge_line(&mut line), 8);
        assert_eq!(line, [3, 3, 0, 0]);
    }

    #[test]
    fn test_slide_right() {
        let mut board = row([0, 2, 2, 2]);
        assert_eq!(board.slide(Direction::Right), Some(8));
        assert_eq!(&board.ranks()[..4], &[0, 0, 2, 3]);
    }

    #[test]
    fn test_slide_up_and_down() {
        let mut ranks = [0u8; 16];
        ranks[0] = 1;
        ranks[8] = 1;
        ranks[13] = 4;
        let board = Board::from_ranks(ranks);

        let (reward, up) = board.slided(Direction::Up).unwrap();
        assert_eq!(reward, 4);
        assert_eq!(up.cell(0), 2);
        assert_eq!(up.cell(1), 4);
        assert_eq!(up.cell(8), 0);
        assert_eq!(up.cell(13), 0);

        let (reward, down) = board.slided(Direction::Down).unwrap();
        assert_eq!(reward, 4);
        assert_eq!(down.cell(12), 2);
        assert_eq!(down.cell(13), 4);
        assert_eq!(down.cell(0), 0);
    }

    #[test]
    fn test_slide_without_merge_returns_zero_reward() {
        let mut board = row([0, 0, 0, 1]);
        assert_eq!(board.slide(Direction::Left), Some(0));
        assert_eq!(board.cell(0), 1);
    }

    #[test]
    fn test_no_effect_leaves_board_unchanged() {
        let original = row([1, 2, 3, 4]);
        let mut board = original;
        assert_eq!(board.slide(Direction::Left), None);
        assert_eq!(board.slide(Direction::Right), None);
        assert_eq!(board, original);
    }

    #[test]
    fn test_terminal_board() {
        let board = Board::from_ranks([1, 2, 1, 2, 2, 1, 2, 1, 1, 2, 1, 2, 2, 1, 2, 1]);
        assert!(board.is_terminal());
        assert_eq!(board.count_empty(), 0);

        assert!(!row([1, 1, 0, 0]).is_terminal());
    }

    #[test]
    fn test_empty_cells_and_max() {
        let board = row([0, 5, 0, 3]);
        let empty: Vec<usize> = board.empty_cells().collect();
        assert_eq!(empty.len(), 14);
        assert_eq!(empty[0], 0);
        assert_eq!(empty[1], 2);
        assert_eq!(board.max_rank(), 5);
        assert_eq!(board.max_tile(), 32);
    }

    #[test]
    fn test_direction_opcode_roundtrip() {
        for dir in Direction::ALL {
            assert_eq!(Direction::from_opcode(dir.opcode()), Some(dir));
        }
    }

    #[test]
    fn test_display_shows_tile_values() {
        let board = row([1, 11, 0, 0]);
        let text = board.to_string();
        assert!(text.contains("2048"));
        assert!(text.contains("     2"));
    }
}
