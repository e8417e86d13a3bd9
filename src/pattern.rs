//! nタプルパターンの定義と特徴インデックス抽出
//!
//! 評価関数で使用するパターン（盤面上のマスの組）を管理する。
//! 各パターンは独立した重みテーブルを持ち、パターン内のマスのランクを
//! R進数として読んだ値がテーブルのインデックスになる（Rはアルファベットサイズ）。
//!
//! パターン集合とアルファベットサイズは`NTupleConfig`にまとめて保持し、
//! 重みファイルのヘッダに書き込むことで読み込み時の不一致を検出する。

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::board::{BOARD_CELLS, BOARD_SIZE, Board};

/// 1パターンの最大セル数
pub const MAX_PATTERN_LEN: usize = 8;

/// 1構成あたりの最大パターン数（重みファイルのヘッダで扱える上限）
pub const MAX_PATTERNS: usize = 256;

/// デフォルトのアルファベットサイズ（想定する最大ランクより大きく取る）
pub const DEFAULT_ALPHABET: u8 = 31;

/// 1テーブルあたりの最大エントリ数（u32で表現できる範囲）
pub const MAX_TABLE_ENTRIES: u64 = u32::MAX as u64;

/// デフォルトの5セルパターン（24個）
pub const DEFAULT_FIVE_TUPLES: [[u8; 5]; 24] = [
    [0, 1, 2, 3, 4],
    [5, 6, 7, 10, 11],
    [8, 9, 12, 13, 14],
    [0, 1, 2, 3, 7],
    [4, 5, 6, 8, 9],
    [10, 11, 13, 14, 15],
    [1, 2, 3, 6, 7],
    [4, 5, 8, 9, 10],
    [11, 12, 13, 14, 15],
    [0, 1, 2, 4, 5],
    [6, 7, 9, 10, 11],
    [8, 12, 13, 14, 15],
    [0, 4, 8, 12, 13],
    [1, 2, 5, 6, 9],
    [7, 10, 11, 14, 15],
    [0, 1, 4, 8, 12],
    [5, 9, 10, 13, 14],
    [2, 3, 6, 7, 11],
    [2, 3, 7, 11, 15],
    [6, 9, 10, 13, 14],
    [0, 1, 4, 5, 8],
    [3, 7, 11, 14, 15],
    [1, 2, 5, 6, 10],
    [4, 8, 9, 12, 13],
];

/// デフォルトの4セルパターン（行4本 + 列4本）
pub const DEFAULT_FOUR_TUPLES: [[u8; 4]; 8] = [
    [0, 1, 2, 3],
    [4, 5, 6, 7],
    [8, 9, 10, 11],
    [12, 13, 14, 15],
    [0, 4, 8, 12],
    [1, 5, 9, 13],
    [2, 6, 10, 14],
    [3, 7, 11, 15],
];

/// Pattern定義のエラー型
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PatternError {
    /// パターンファイルの読み込みエラー
    #[error("Failed to load patterns: {0}")]
    LoadError(String),

    /// パターンの座標が範囲外（0-15以外）
    #[error("Invalid pattern position: {0}")]
    InvalidPosition(u8),

    /// パターンのセル数が不正
    #[error("Invalid pattern length: {0} (expected 1-{MAX_PATTERN_LEN})")]
    InvalidLength(usize),

    /// 同じパターン内で座標が重複している
    #[error("Duplicate position {0} in pattern")]
    DuplicatePosition(u8),

    /// アルファベットサイズが不正、またはテーブルが大きすぎる
    #[error("Invalid alphabet size {alphabet} for pattern of {k} cells")]
    InvalidAlphabet { alphabet: u8, k: usize },

    /// パターン数の不一致
    #[error("Pattern count mismatch: expected {expected}, found {found}")]
    CountMismatch { expected: usize, found: usize },

    /// パターンが1つもない
    #[error("Pattern set is empty")]
    Empty,

    /// パターン数が上限を超えている
    #[error("Too many patterns: {0} (maximum {MAX_PATTERNS})")]
    TooManyPatterns(usize),

    /// I/Oエラー
    #[error("I/O error: {0}")]
    IoError(String),

    /// CSVパースエラー
    #[error("CSV parse error: {0}")]
    CsvError(String),
}

/// パターン構造体
///
/// 固定長配列でヒープアロケーションを避ける。
/// `positions[..k]`が有効なセル位置。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Pattern {
    /// パターンID
    pub id: u8,
    /// セル数
    pub k: u8,
    /// セル位置（0-15）
    pub positions: [u8; MAX_PATTERN_LEN],
}

/// CSV読み込み用の中間構造体
#[derive(Debug, Deserialize)]
struct PatternCsv {
    id: String,
    positions: String,
}

impl Pattern {
    /// 新しいPatternを作成
    ///
    /// # Errors
    ///
    /// - セル数が0または`MAX_PATTERN_LEN`超: `PatternError::InvalidLength`
    /// - 位置が16以上: `PatternError::InvalidPosition`
    /// - 位置の重複: `PatternError::DuplicatePosition`
    ///
    /// # Examples
    ///
    /// ```
    /// use tiletd::pattern::Pattern;
    ///
    /// let pattern = Pattern::new(0, &[0, 1, 2, 3]).unwrap();
    /// assert_eq!(pattern.k, 4);
    /// assert!(Pattern::new(1, &[0, 16]).is_err());
    /// ```
    pub fn new(id: u8, positions: &[u8]) -> Result<Self, PatternError> {
        if positions.is_empty() || positions.len() > MAX_PATTERN_LEN {
            return Err(PatternError::InvalidLength(positions.len()));
        }

        let mut pos_array = [0u8; MAX_PATTERN_LEN];
        for (i, &pos) in positions.iter().enumerate() {
            if pos as usize >= BOARD_CELLS {
                return Err(PatternError::InvalidPosition(pos));
            }
            if positions[..i].contains(&pos) {
                return Err(PatternError::DuplicatePosition(pos));
            }
            pos_array[i] = pos;
        }

        Ok(Self {
            id,
            k: positions.len() as u8,
            positions: pos_array,
        })
    }

    /// 有効なセル位置のスライス
    #[inline]
    pub fn cells(&self) -> &[u8] {
        &self.positions[..self.k as usize]
    }

    /// アルファベットサイズRでのテーブルサイズ（R^k）
    #[inline]
    pub fn table_size(&self, alphabet: u8) -> usize {
        (alphabet as usize).pow(self.k as u32)
    }
}

/// パターンの特徴インデックスを抽出
///
/// `index = Σ rank(cell_i) * R^(k-1-i)`。先頭のセルが最上位の桁になる。
///
/// # Panics
///
/// パターン内のいずれかのマスのランクが`alphabet`以上の場合。
/// テーブル外アクセスを黙って許さないための前提条件チェック。
///
/// # Examples
///
/// ```
/// use tiletd::board::Board;
/// use tiletd::pattern::{Pattern, extract_index};
///
/// let pattern = Pattern::new(0, &[0, 1, 2]).unwrap();
/// let board = Board::from_ranks([1, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
///
/// // 1*31^2 + 0*31 + 2 = 963
/// assert_eq!(extract_index(&board, &pattern, 31), 963);
/// ```
#[inline]
pub fn extract_index(board: &Board, pattern: &Pattern, alphabet: u8) -> usize {
    let radix = alphabet as usize;
    let mut index = 0usize;

    for &pos in pattern.cells() {
        let rank = board.cell(pos as usize);
        assert!(
            rank < alphabet,
            "tile rank {} at cell {} is outside alphabet of size {}",
            rank,
            pos,
            alphabet
        );
        index = index * radix + rank as usize;
    }

    index
}

/// nタプル構成（アルファベットサイズ + 順序付きパターン列）
///
/// 重みテーブルの数とサイズはこの構成だけから決まる。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NTupleConfig {
    alphabet: u8,
    patterns: Vec<Pattern>,
}

impl NTupleConfig {
    /// 構成を作成して検証する
    ///
    /// # Errors
    ///
    /// - パターンが空: `PatternError::Empty`
    /// - パターン数が`MAX_PATTERNS`超: `PatternError::TooManyPatterns`
    /// - アルファベットが2未満、またはR^kが`MAX_TABLE_ENTRIES`を超える:
    ///   `PatternError::InvalidAlphabet`
    pub fn new(alphabet: u8, patterns: Vec<Pattern>) -> Result<Self, PatternError> {
        if patterns.is_empty() {
            return Err(PatternError::Empty);
        }
        if patterns.len() > MAX_PATTERNS {
            return Err(PatternError::TooManyPatterns(patterns.len()));
        }

        for pattern in &patterns {
            let k = pattern.k as usize;
            let entries = (alphabet as u64).checked_pow(k as u32);
            let too_large = entries.is_none_or(|n| n > MAX_TABLE_ENTRIES);
            if alphabet < 2 || too_large {
                return Err(PatternError::InvalidAlphabet { alphabet, k });
            }
        }

        Ok(Self { alphabet, patterns })
    }

    /// 座標配列のリストから構成を作成
    ///
    /// # Examples
    ///
    /// ```
    /// use tiletd::pattern::NTupleConfig;
    ///
    /// let config = NTupleConfig::from_positions(16, &[&[0, 1, 2, 3], &[0, 4, 8, 12]]).unwrap();
    /// assert_eq!(config.len(), 2);
    /// assert_eq!(config.table_size(0), 65536);
    /// ```
    pub fn from_positions(alphabet: u8, positions: &[&[u8]]) -> Result<Self, PatternError> {
        // IDはu8なので上限チェックを先に行う
        if positions.len() > MAX_PATTERNS {
            return Err(PatternError::TooManyPatterns(positions.len()));
        }
        let patterns = positions
            .iter()
            .enumerate()
            .map(|(id, cells)| Pattern::new(id as u8, cells))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(alphabet, patterns)
    }

    /// パターンファイル（CSV）から構成を作成
    pub fn from_csv<P: AsRef<Path>>(alphabet: u8, path: P) -> Result<Self, PatternError> {
        Self::new(alphabet, load_patterns(path)?)
    }

    /// アルファベットサイズ
    #[inline]
    pub fn alphabet(&self) -> u8 {
        self.alphabet
    }

    /// パターン列
    #[inline]
    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    /// パターン数（= 重みテーブル数）
    #[inline]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// パターンが空かどうか（`new`で検証済みなので常にfalse）
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// 指定パターンのテーブルサイズ
    #[inline]
    pub fn table_size(&self, pattern_id: usize) -> usize {
        self.patterns[pattern_id].table_size(self.alphabet)
    }

    /// 全テーブルの合計エントリ数
    pub fn total_entries(&self) -> usize {
        (0..self.len()).map(|i| self.table_size(i)).sum()
    }

    /// 構成のフィンガープリント（アルファベットと全パターン座標のCRC32）
    pub fn fingerprint(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[self.alphabet]);
        for pattern in &self.patterns {
            hasher.update(&[pattern.k]);
            hasher.update(pattern.cells());
        }
        hasher.finalize()
    }
}

impl Default for NTupleConfig {
    /// 5セル24個 + 4セル8個、アルファベット31
    fn default() -> Self {
        let patterns = DEFAULT_FIVE_TUPLES
            .iter()
            .map(|cells| &cells[..])
            .chain(DEFAULT_FOUR_TUPLES.iter().map(|cells| &cells[..]))
            .enumerate()
            .map(|(id, cells)| Pattern {
                id: id as u8,
                k: cells.len() as u8,
                positions: {
                    let mut positions = [0u8; MAX_PATTERN_LEN];
                    positions[..cells.len()].copy_from_slice(cells);
                    positions
                },
            })
            .collect();

        Self {
            alphabet: DEFAULT_ALPHABET,
            patterns,
        }
    }
}

/// 座標文字列をマス位置に変換
///
/// 列A-D、行1-4の表記（A1=0, D1=3, A2=4, ..., D4=15）。
///
/// # Errors
///
/// 座標形式が不正な場合、`PatternError::LoadError`を返す。
///
/// # Examples
///
/// ```
/// use tiletd::pattern::coord_to_pos;
///
/// assert_eq!(coord_to_pos("A1").unwrap(), 0);
/// assert_eq!(coord_to_pos("C2").unwrap(), 6);
/// assert_eq!(coord_to_pos("d4").unwrap(), 15);
/// assert!(coord_to_pos("E1").is_err());
/// ```
pub fn coord_to_pos(coord: &str) -> Result<u8, PatternError> {
    let coord = coord.trim();
    let bytes = coord.as_bytes();
    if bytes.len() != 2 {
        return Err(PatternError::LoadError(format!(
            "Invalid coordinate format: {}",
            coord
        )));
    }

    let col = match bytes[0] {
        b'A'..=b'D' => bytes[0] - b'A',
        b'a'..=b'd' => bytes[0] - b'a',
        other => {
            return Err(PatternError::LoadError(format!(
                "Invalid column: {}",
                other as char
            )));
        }
    };

    let row = match bytes[1] {
        b'1'..=b'4' => bytes[1] - b'1',
        other => {
            return Err(PatternError::LoadError(format!(
                "Invalid row: {}",
                other as char
            )));
        }
    };

    Ok(row * BOARD_SIZE as u8 + col)
}

/// パターン定義CSVを読み込む
///
/// 列は`id,positions`。`id`は`P01`形式、`positions`は空白区切りの座標。
/// 出力はID順にソートされる。
///
/// ```text
/// id,positions
/// P01,A1 B1 C1 D1 A2
/// P02,A1 A2 A3 A4
/// ```
///
/// # Errors
///
/// - ファイルが存在しない: `PatternError::IoError`
/// - CSV形式エラー: `PatternError::CsvError`
/// - ID・座標形式エラー: `PatternError::LoadError`
/// - IDの欠番・重複: `PatternError::CountMismatch`
pub fn load_patterns<P: AsRef<Path>>(path: P) -> Result<Vec<Pattern>, PatternError> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Err(PatternError::IoError(format!(
            "File not found: {}",
            path_ref.display()
        )));
    }

    let mut reader = csv::Reader::from_path(path_ref)
        .map_err(|e| PatternError::CsvError(format!("Failed to open CSV: {}", e)))?;

    let mut patterns = Vec::new();

    for (idx, result) in reader.deserialize().enumerate() {
        let record: PatternCsv = result.map_err(|e| {
            PatternError::CsvError(format!("Failed to parse CSV at line {}: {}", idx + 2, e))
        })?;

        // P01 -> 0, P02 -> 1, ...
        let id = match record.id.strip_prefix(['P', 'p']) {
            Some(num) => num
                .parse::<u8>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .ok_or_else(|| {
                    PatternError::LoadError(format!("Invalid pattern ID: {}", record.id))
                })?,
            None => {
                return Err(PatternError::LoadError(format!(
                    "Invalid pattern ID format: {}",
                    record.id
                )));
            }
        };

        let positions = record
            .positions
            .split_whitespace()
            .map(coord_to_pos)
            .collect::<Result<Vec<u8>, PatternError>>()?;

        patterns.push(Pattern::new(id, &positions)?);
    }

    if patterns.is_empty() {
        return Err(PatternError::Empty);
    }

    patterns.sort_by_key(|p| p.id);
    for (expected, pattern) in patterns.iter().enumerate() {
        if pattern.id as usize != expected {
            return Err(PatternError::CountMismatch {
                expected: patterns.len(),
                found: expected,
            });
        }
    }

    Ok(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_pattern_new_validates_positions() {
        assert_eq!(
            Pattern::new(0, &[0, 1, 16]),
            Err(PatternError::InvalidPosition(16))
        );
        assert_eq!(Pattern::new(0, &[]), Err(PatternError::InvalidLength(0)));
        assert_eq!(
            Pattern::new(0, &[0; 9]),
            Err(PatternError::InvalidLength(9))
        );
        assert_eq!(
            Pattern::new(0, &[3, 4, 3]),
            Err(PatternError::DuplicatePosition(3))
        );
    }

    #[test]
    fn test_extract_index_is_big_endian_in_pattern_order() {
        let pattern = Pattern::new(0, &[3, 0]).unwrap();
        let mut ranks = [0u8; 16];
        ranks[0] = 2;
        ranks[3] = 5;
        let board = Board::from_ranks(ranks);

        // 先頭セル（位置3）が最上位の桁
        assert_eq!(extract_index(&board, &pattern, 10), 52);
    }

    #[test]
    fn test_extract_index_within_table_range() {
        let alphabet = 7u8;
        let pattern = Pattern::new(0, &[0, 5, 10, 15]).unwrap();
        let size = pattern.table_size(alphabet);
        assert_eq!(size, 7 * 7 * 7 * 7);

        for a in 0..alphabet {
            for b in 0..alphabet {
                let mut ranks = [0u8; 16];
                ranks[0] = a;
                ranks[5] = b;
                ranks[10] = alphabet - 1;
                ranks[15] = alphabet - 1;
                let index = extract_index(&Board::from_ranks(ranks), &pattern, alphabet);
                assert!(index < size);
            }
        }
    }

    #[test]
    fn test_extract_index_distinct_assignments_are_distinct() {
        let alphabet = 5u8;
        let pattern = Pattern::new(0, &[1, 2, 6]).unwrap();
        let mut seen = std::collections::HashSet::new();

        for a in 0..alphabet {
            for b in 0..alphabet {
                for c in 0..alphabet {
                    let mut ranks = [0u8; 16];
                    ranks[1] = a;
                    ranks[2] = b;
                    ranks[6] = c;
                    let index = extract_index(&Board::from_ranks(ranks), &pattern, alphabet);
                    assert!(seen.insert(index), "index {} produced twice", index);
                }
            }
        }
        assert_eq!(seen.len(), 125);
    }

    #[test]
    #[should_panic(expected = "outside alphabet")]
    fn test_extract_index_rejects_rank_outside_alphabet() {
        let pattern = Pattern::new(0, &[0, 1]).unwrap();
        let board = Board::from_ranks([16, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        extract_index(&board, &pattern, 16);
    }

    #[test]
    fn test_default_config_matches_reference_layout() {
        let config = NTupleConfig::default();
        assert_eq!(config.alphabet(), 31);
        assert_eq!(config.len(), 32);
        assert!(config.patterns()[..24].iter().all(|p| p.k == 5));
        assert!(config.patterns()[24..].iter().all(|p| p.k == 4));
        assert_eq!(config.table_size(0), 31usize.pow(5));
        assert_eq!(config.table_size(31), 31usize.pow(4));
        assert_eq!(config.patterns()[2].cells(), &[8, 9, 12, 13, 14]);
    }

    #[test]
    fn test_config_rejects_bad_alphabet() {
        let pattern = Pattern::new(0, &[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        assert!(matches!(
            NTupleConfig::new(1, vec![pattern]),
            Err(PatternError::InvalidAlphabet { .. })
        ));
        // 31^8はu32に収まらない
        assert!(matches!(
            NTupleConfig::new(31, vec![pattern]),
            Err(PatternError::InvalidAlphabet { .. })
        ));
        assert_eq!(NTupleConfig::new(16, vec![]), Err(PatternError::Empty));
    }

    #[test]
    fn test_pattern_count_limit() {
        let cell: &[u8] = &[0];
        let at_limit = vec![cell; MAX_PATTERNS];
        let config = NTupleConfig::from_positions(2, &at_limit).unwrap();
        assert_eq!(config.len(), MAX_PATTERNS);
        assert_eq!(config.patterns()[MAX_PATTERNS - 1].id, 255);

        let over = vec![cell; MAX_PATTERNS + 1];
        assert_eq!(
            NTupleConfig::from_positions(2, &over),
            Err(PatternError::TooManyPatterns(MAX_PATTERNS + 1))
        );

        let pattern = Pattern::new(0, &[0]).unwrap();
        assert_eq!(
            NTupleConfig::new(2, vec![pattern; MAX_PATTERNS + 1]),
            Err(PatternError::TooManyPatterns(MAX_PATTERNS + 1))
        );
    }

    #[test]
    fn test_fingerprint_distinguishes_configs() {
        let a = NTupleConfig::from_positions(16, &[&[0, 1, 2, 3]]).unwrap();
        let b = NTupleConfig::from_positions(16, &[&[0, 1, 2, 4]]).unwrap();
        let c = NTupleConfig::from_positions(15, &[&[0, 1, 2, 3]]).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
    }

    #[test]
    fn test_coord_to_pos() {
        assert_eq!(coord_to_pos("A1").unwrap(), 0);
        assert_eq!(coord_to_pos("D1").unwrap(), 3);
        assert_eq!(coord_to_pos("A2").unwrap(), 4);
        assert_eq!(coord_to_pos("D4").unwrap(), 15);
        assert!(coord_to_pos("A5").is_err());
        assert!(coord_to_pos("A").is_err());
    }

    #[test]
    fn test_load_patterns_from_csv() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "id,positions").unwrap();
        writeln!(file, "P02,A1 A2 A3 A4").unwrap();
        writeln!(file, "P01,A1 B1 C1 D1 A2").unwrap();
        file.flush().unwrap();

        let patterns = load_patterns(file.path()).unwrap();
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].id, 0);
        assert_eq!(patterns[0].cells(), &[0, 1, 2, 3, 4]);
        assert_eq!(patterns[1].cells(), &[0, 4, 8, 12]);
    }

    #[test]
    fn test_load_patterns_rejects_gaps() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "id,positions").unwrap();
        writeln!(file, "P01,A1 B1").unwrap();
        writeln!(file, "P03,A1 A2").unwrap();
        file.flush().unwrap();

        assert!(matches!(
            load_patterns(file.path()),
            Err(PatternError::CountMismatch { .. })
        ));
    }

    #[test]
    fn test_load_patterns_missing_file() {
        assert!(matches!(
            load_patterns("no/such/patterns.csv"),
            Err(PatternError::IoError(_))
        ));
    }
}
