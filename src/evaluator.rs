//! 重みテーブル管理と価値推定モジュール
//!
//! パターンごとに独立したf32テーブルを保持し、盤面の価値を
//! 全パターンの重みの合計として推定する。

use crate::board::Board;
use crate::pattern::{NTupleConfig, PatternError, extract_index};

/// 1パターン分の重みテーブル
///
/// サイズは生成時にR^kで固定され、以後変化しない。
#[derive(Clone, Debug, PartialEq)]
pub struct WeightTable {
    data: Box<[f32]>,
}

impl WeightTable {
    /// 全エントリ0で初期化したテーブルを作成
    ///
    /// # Examples
    ///
    /// ```
    /// use tiletd::evaluator::WeightTable;
    ///
    /// let table = WeightTable::new(16);
    /// assert_eq!(table.len(), 16);
    /// assert_eq!(table.get(3), 0.0);
    /// ```
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0.0f32; len].into_boxed_slice(),
        }
    }

    /// 既存の値からテーブルを作成
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            data: values.into_boxed_slice(),
        }
    }

    /// エントリ数
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 空テーブルかどうか
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 重みを取得
    ///
    /// # Panics
    ///
    /// `index`が範囲外の場合
    #[inline]
    pub fn get(&self, index: usize) -> f32 {
        self.data[index]
    }

    /// 重みを設定
    ///
    /// # Panics
    ///
    /// `index`が範囲外の場合
    #[inline]
    pub fn set(&mut self, index: usize, value: f32) {
        self.data[index] = value;
    }

    /// 重みに加算
    #[inline]
    pub fn add(&mut self, index: usize, delta: f32) {
        self.data[index] += delta;
    }

    /// 生データ
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// 生データ（可変）
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

/// 全パターン分の重みテーブル
///
/// # メモリレイアウト
///
/// tables\[pattern_id\]\[index\]形式。テーブル数はパターン数と一致し、
/// 各テーブルのサイズはアルファベットサイズR、パターン長kに対してR^k。
///
/// デフォルト構成（R=31、5セル24個 + 4セル8個）では約2.7GBになる。
#[derive(Clone, Debug, PartialEq)]
pub struct WeightStore {
    tables: Vec<WeightTable>,
}

impl WeightStore {
    /// 構成に従って全テーブルを0で初期化
    pub fn new(config: &NTupleConfig) -> Self {
        let tables = (0..config.len())
            .map(|i| WeightTable::new(config.table_size(i)))
            .collect();
        Self { tables }
    }

    /// 読み込み済みのテーブル列から作成
    ///
    /// テーブル数・サイズの検証は呼び出し側（`Evaluator::with_store`）で行う。
    pub fn from_tables(tables: Vec<WeightTable>) -> Self {
        Self { tables }
    }

    /// テーブル数
    #[inline]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// テーブルが1つもないかどうか
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// 指定パターンのテーブル
    #[inline]
    pub fn table(&self, pattern_id: usize) -> &WeightTable {
        &self.tables[pattern_id]
    }

    /// 指定パターンのテーブル（可変）
    #[inline]
    pub fn table_mut(&mut self, pattern_id: usize) -> &mut WeightTable {
        &mut self.tables[pattern_id]
    }

    /// 全テーブルのイテレータ
    pub fn tables(&self) -> impl Iterator<Item = &WeightTable> {
        self.tables.iter()
    }

    /// メモリ使用量を計算（バイト単位）
    pub fn memory_usage(&self) -> usize {
        self.tables
            .iter()
            .map(|t| t.len() * std::mem::size_of::<f32>())
            .sum()
    }
}

/// 価値推定器（Evaluator）
///
/// nタプル構成と重みストアの組。盤面（アフターステート）の価値を
/// 各パターンの特徴インデックスに対応する重みの合計として返す。
///
/// # 使用例
///
/// ```
/// use tiletd::board::Board;
/// use tiletd::evaluator::Evaluator;
/// use tiletd::pattern::NTupleConfig;
///
/// let config = NTupleConfig::from_positions(8, &[&[0, 1, 2, 3], &[0, 4, 8, 12]]).unwrap();
/// let mut evaluator = Evaluator::new(config);
/// let board = Board::from_ranks([1, 2, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
///
/// assert_eq!(evaluator.estimate(&board), 0.0);
/// evaluator.apply_delta(&board, 0.5);
/// assert_eq!(evaluator.estimate(&board), 1.0);
/// ```
#[derive(Clone, Debug)]
pub struct Evaluator {
    config: NTupleConfig,
    store: WeightStore,
}

impl Evaluator {
    /// 全重み0のEvaluatorを作成
    pub fn new(config: NTupleConfig) -> Self {
        let store = WeightStore::new(&config);
        Self { config, store }
    }

    /// 既存の重みストアからEvaluatorを作成
    ///
    /// # Errors
    ///
    /// - テーブル数がパターン数と異なる: `PatternError::CountMismatch`
    /// - テーブルサイズがR^kと異なる: `PatternError::CountMismatch`
    pub fn with_store(config: NTupleConfig, store: WeightStore) -> Result<Self, PatternError> {
        if store.len() != config.len() {
            return Err(PatternError::CountMismatch {
                expected: config.len(),
                found: store.len(),
            });
        }
        for (i, table) in store.tables().enumerate() {
            let expected = config.table_size(i);
            if table.len() != expected {
                return Err(PatternError::CountMismatch {
                    expected,
                    found: table.len(),
                });
            }
        }
        Ok(Self { config, store })
    }

    /// nタプル構成
    #[inline]
    pub fn config(&self) -> &NTupleConfig {
        &self.config
    }

    /// 重みストア
    #[inline]
    pub fn store(&self) -> &WeightStore {
        &self.store
    }

    /// 重みストア（可変）
    #[inline]
    pub fn store_mut(&mut self) -> &mut WeightStore {
        &mut self.store
    }

    /// 盤面の価値を推定
    ///
    /// 各パターンについて特徴インデックスを計算し、その重みを合計する。
    ///
    /// # Panics
    ///
    /// 盤面上のランクがアルファベットサイズ以上の場合
    pub fn estimate(&self, board: &Board) -> f32 {
        let alphabet = self.config.alphabet();
        self.config
            .patterns()
            .iter()
            .zip(self.store.tables())
            .map(|(pattern, table)| table.get(extract_index(board, pattern, alphabet)))
            .sum()
    }

    /// 盤面で有効な全エントリに`delta`を加算
    ///
    /// TD更新の1ステップ分。盤面の新しい推定値は
    /// `旧推定値 + パターン数 × delta`になる。
    ///
    /// # Returns
    ///
    /// 更新したエントリ数（= パターン数）
    pub fn apply_delta(&mut self, board: &Board, delta: f32) -> usize {
        let alphabet = self.config.alphabet();
        for (pattern, table) in self
            .config
            .patterns()
            .iter()
            .zip(self.store.tables.iter_mut())
        {
            table.add(extract_index(board, pattern, alphabet), delta);
        }
        self.config.len()
    }
}
