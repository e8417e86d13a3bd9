//! エージェント（環境・ベースラインプレイヤー・学習プレイヤー）
//!
//! 役割の集合は閉じているため、トレイトオブジェクトではなく
//! タグ付き列挙型`Agent`で表現する。構成は`AgentConfig`で一度だけ検証する。

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::board::{BOARD_CELLS, Board, Direction, Reward};
use crate::evaluator::Evaluator;
use crate::learning::LearningError;
use crate::learning::checkpoint::{WeightFile, load_weights};
use crate::learning::game_history::GameHistory;
use crate::learning::td_learner::{
    DEFAULT_ALPHA, DEFAULT_N_STEP, TDLearner, TDUpdateStats, validate_hyperparameters,
};
use crate::pattern::NTupleConfig;
use crate::search::{
    COMMON_TILE_PROB, COMMON_TILE_RANK, RARE_TILE_RANK, first_legal, greedy_one_ply,
    greedy_two_ply, lookahead,
};

/// エージェントの行動
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// プレイヤーのスライド
    Slide(Direction),
    /// 環境によるタイル配置
    Place {
        /// 配置位置（0-15）
        pos: usize,
        /// タイルのランク
        rank: u8,
    },
    /// 行動なし（合法手なし・空きマスなし）
    None,
}

impl Action {
    /// 行動なしかどうか
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Action::None)
    }

    /// 盤面に行動を適用する
    ///
    /// スライドは報酬を、配置は0を返す。盤面が変化しない場合
    /// （無効なスライド、埋まったマスへの配置、`None`）は`None`。
    ///
    /// # Examples
    ///
    /// ```
    /// use tiletd::agent::Action;
    /// use tiletd::board::{Board, Direction};
    ///
    /// let mut board = Board::EMPTY;
    /// assert_eq!(Action::Place { pos: 0, rank: 1 }.apply(&mut board), Some(0));
    /// assert_eq!(Action::Place { pos: 1, rank: 1 }.apply(&mut board), Some(0));
    /// assert_eq!(Action::Slide(Direction::Left).apply(&mut board), Some(4));
    /// assert_eq!(Action::None.apply(&mut board), None);
    /// ```
    pub fn apply(&self, board: &mut Board) -> Option<Reward> {
        match *self {
            Action::Slide(dir) => board.slide(dir),
            Action::Place { pos, rank } => {
                if pos < BOARD_CELLS && board.cell(pos) == 0 {
                    board.place(pos, rank);
                    Some(0)
                } else {
                    None
                }
            }
            Action::None => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Slide(dir) => write!(f, "#{}", dir),
            Action::Place { pos, rank } => write!(f, "{}@{}", rank, pos),
            Action::None => f.write_str("none"),
        }
    }
}

/// プレイヤーの手選択戦略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strategy {
    /// シャッフルした順で最初の合法手
    Random,
    /// 即時報酬最大
    Greedy,
    /// 連続2スライドの報酬合計最大
    GreedyTwoPly,
    /// 報酬 + 期待価値の先読み（学習あり）
    #[default]
    Td,
}

impl Strategy {
    /// 表示名
    pub fn name(self) -> &'static str {
        match self {
            Strategy::Random => "random",
            Strategy::Greedy => "greedy",
            Strategy::GreedyTwoPly => "greedy2",
            Strategy::Td => "td",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = LearningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" | "dummy" => Ok(Strategy::Random),
            "greedy" | "greedy1" => Ok(Strategy::Greedy),
            "greedy2" => Ok(Strategy::GreedyTwoPly),
            "td" | "lookahead" => Ok(Strategy::Td),
            other => Err(LearningError::Config(format!("Unknown strategy: {}", other))),
        }
    }
}

/// エージェントの役割
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// タイルを配置する環境
    Environment,
    /// スライドを選ぶプレイヤー
    Player,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Environment => f.write_str("environment"),
            Role::Player => f.write_str("player"),
        }
    }
}

/// エージェント構成
///
/// 構築時に一度だけ`validate`する。
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// 乱数シード（Noneなら OS から取得）
    pub seed: Option<u64>,
    /// 学習率（0で推論のみ）
    pub alpha: f32,
    /// nステップTDのn
    pub n_step: usize,
    /// 読み込む重みファイル（Noneなら全0で開始）
    pub load: Option<PathBuf>,
    /// 保存先の重みファイル
    pub save: Option<PathBuf>,
    /// 手選択戦略
    pub strategy: Strategy,
    /// nタプル構成
    pub ntuple: NTupleConfig,
    /// 保存時のファイル形式
    pub weight_file: WeightFile,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            seed: None,
            alpha: DEFAULT_ALPHA,
            n_step: DEFAULT_N_STEP,
            load: None,
            save: None,
            strategy: Strategy::default(),
            ntuple: NTupleConfig::default(),
            weight_file: WeightFile::default(),
        }
    }
}

impl AgentConfig {
    /// 構成を検証
    ///
    /// # Errors
    ///
    /// 学習率が負または非有限、nが0の場合`LearningError::Config`
    pub fn validate(&self) -> Result<(), LearningError> {
        validate_hyperparameters(self.alpha, self.n_step)
    }
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// ランダム環境
///
/// 16マスをシャッフルして最初の空きマスにタイルを置く。
/// ランク1を確率0.9、ランク2を確率0.1で選ぶ。
pub struct RandomEnvironment {
    rng: StdRng,
    space: [usize; BOARD_CELLS],
}

impl RandomEnvironment {
    /// 新しい環境を作成
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: make_rng(seed),
            space: std::array::from_fn(|i| i),
        }
    }

    /// 次のタイル配置。空きマスがなければ`Action::None`
    pub fn take_action(&mut self, board: &Board) -> Action {
        self.space.shuffle(&mut self.rng);
        for &pos in &self.space {
            if board.cell(pos) != 0 {
                continue;
            }
            let rank = if self.rng.random_bool(COMMON_TILE_PROB as f64) {
                COMMON_TILE_RANK
            } else {
                RARE_TILE_RANK
            };
            return Action::Place { pos, rank };
        }
        Action::None
    }
}

/// ベースラインプレイヤー（学習なし）
pub struct BaselinePlayer {
    strategy: Strategy,
    rng: StdRng,
    order: [Direction; 4],
}

impl BaselinePlayer {
    /// 新しいプレイヤーを作成
    ///
    /// # Errors
    ///
    /// `Strategy::Td`は学習プレイヤー専用のため`LearningError::Config`
    pub fn new(strategy: Strategy, seed: Option<u64>) -> Result<Self, LearningError> {
        if strategy == Strategy::Td {
            return Err(LearningError::Config(
                "td strategy requires a learning player".to_string(),
            ));
        }
        Ok(Self {
            strategy,
            rng: make_rng(seed),
            order: Direction::ALL,
        })
    }

    /// 戦略
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// 次のスライド。合法手がなければ`Action::None`
    pub fn take_action(&mut self, board: &Board) -> Action {
        let choice = match self.strategy {
            Strategy::Random => {
                self.order.shuffle(&mut self.rng);
                first_legal(board, &self.order)
            }
            // Tdは`new`で拒否済み
            Strategy::Greedy | Strategy::Td => greedy_one_ply(board),
            Strategy::GreedyTwoPly => greedy_two_ply(board),
        };
        choice.map_or(Action::None, |c| Action::Slide(c.direction))
    }
}

/// 学習プレイヤー
///
/// 期待値先読みで手を選び、選んだ（報酬、アフターステート）を履歴に記録する。
/// エピソード終了時にnステップTDで重みを更新する。
pub struct TdPlayer {
    evaluator: Evaluator,
    learner: TDLearner,
    history: GameHistory,
    save: Option<PathBuf>,
    weight_file: WeightFile,
    last_update: TDUpdateStats,
}

impl TdPlayer {
    /// 構成から学習プレイヤーを作成
    ///
    /// `load`が指定されていれば重みファイルを読み込む。読み込みに
    /// 失敗した場合は部分的な重みを使わずエラーを返す。
    pub fn new(config: &AgentConfig) -> Result<Self, LearningError> {
        config.validate()?;
        let evaluator = match &config.load {
            Some(path) => load_weights(path, &config.ntuple)?,
            None => {
                log::info!(
                    "Initialising {} zeroed weight tables ({} entries)",
                    config.ntuple.len(),
                    config.ntuple.total_entries()
                );
                Evaluator::new(config.ntuple.clone())
            }
        };
        Self::with_evaluator(config, evaluator)
    }

    /// 既存のEvaluatorから学習プレイヤーを作成
    pub fn with_evaluator(config: &AgentConfig, evaluator: Evaluator) -> Result<Self, LearningError> {
        Ok(Self {
            evaluator,
            learner: TDLearner::new(config.alpha, config.n_step)?,
            history: GameHistory::new(),
            save: config.save.clone(),
            weight_file: config.weight_file,
            last_update: TDUpdateStats::default(),
        })
    }

    /// エピソード開始：履歴を破棄
    pub fn open_episode(&mut self) {
        self.history.clear();
    }

    /// エピソード終了：TD更新
    pub fn close_episode(&mut self) -> &TDUpdateStats {
        self.last_update = self.learner.update(self.history.as_slice(), &mut self.evaluator);
        &self.last_update
    }

    /// 次のスライド。合法手がなければ履歴を変えずに`Action::None`
    pub fn take_action(&mut self, board: &Board) -> Action {
        match lookahead(board, &self.evaluator) {
            Some(choice) => {
                self.history.record(choice.reward, choice.after);
                Action::Slide(choice.direction)
            }
            None => Action::None,
        }
    }

    /// `save`が設定されていれば重みを保存し、ファイルサイズを返す
    pub fn save_weights(&self) -> Result<Option<u64>, LearningError> {
        match &self.save {
            Some(path) => self.weight_file.save(path, &self.evaluator).map(Some),
            None => Ok(None),
        }
    }

    /// 価値推定器
    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// 価値推定器（可変）
    pub fn evaluator_mut(&mut self) -> &mut Evaluator {
        &mut self.evaluator
    }

    /// 現在のエピソード履歴
    pub fn history(&self) -> &GameHistory {
        &self.history
    }

    /// TD更新器
    pub fn learner(&self) -> &TDLearner {
        &self.learner
    }

    /// 直近のTD更新統計
    pub fn last_update(&self) -> &TDUpdateStats {
        &self.last_update
    }
}

/// エージェント
pub enum Agent {
    /// ランダム環境
    Environment(RandomEnvironment),
    /// ベースラインプレイヤー
    Player(BaselinePlayer),
    /// 学習プレイヤー
    Learner(Box<TdPlayer>),
}

impl Agent {
    /// ランダム環境を作成
    pub fn environment(seed: Option<u64>) -> Self {
        Agent::Environment(RandomEnvironment::new(seed))
    }

    /// 構成の戦略に応じたプレイヤーを作成
    pub fn player(config: &AgentConfig) -> Result<Self, LearningError> {
        config.validate()?;
        match config.strategy {
            Strategy::Td => Ok(Agent::Learner(Box::new(TdPlayer::new(config)?))),
            strategy => Ok(Agent::Player(BaselinePlayer::new(strategy, config.seed)?)),
        }
    }

    /// エピソード開始
    pub fn open_episode(&mut self) {
        if let Agent::Learner(player) = self {
            player.open_episode();
        }
    }

    /// エピソード終了
    pub fn close_episode(&mut self) {
        if let Agent::Learner(player) = self {
            player.close_episode();
        }
    }

    /// 行動を選ぶ
    pub fn take_action(&mut self, board: &Board) -> Action {
        match self {
            Agent::Environment(env) => env.take_action(board),
            Agent::Player(player) => player.take_action(board),
            Agent::Learner(player) => player.take_action(board),
        }
    }

    /// 名前
    pub fn name(&self) -> &'static str {
        match self {
            Agent::Environment(_) => "random",
            Agent::Player(player) => player.strategy().name(),
            Agent::Learner(_) => "td",
        }
    }

    /// 役割
    pub fn role(&self) -> Role {
        match self {
            Agent::Environment(_) => Role::Environment,
            Agent::Player(_) | Agent::Learner(_) => Role::Player,
        }
    }

    /// 学習プレイヤーなら参照を返す
    pub fn as_learner(&self) -> Option<&TdPlayer> {
        match self {
            Agent::Learner(player) => Some(player.as_ref()),
            _ => None,
        }
    }

    /// 学習プレイヤーなら可変参照を返す
    pub fn as_learner_mut(&mut self) -> Option<&mut TdPlayer> {
        match self {
            Agent::Learner(player) => Some(player.as_mut()),
            _ => None,
        }
    }
}
