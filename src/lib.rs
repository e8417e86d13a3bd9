//! tiletd - 2048用nタプル価値関数エージェント
//!
//! 盤面を重なり合う小さなパターン（nタプル）に分解し、パターンごとの
//! 重みテーブルの総和で状態価値を推定する。手の選択は即時報酬と
//! タイル出現の期待値を組み合わせた先読み、学習はエピソード終了時の
//! nステップTD更新で行う。
//!
//! - [`board`]: 4×4盤面とスライド
//! - [`pattern`]: nタプル構成と特徴抽出
//! - [`evaluator`]: 重みテーブルと価値推定
//! - [`search`]: 手選択戦略
//! - [`agent`]: 環境・プレイヤー
//! - [`learning`]: TD学習、重みファイル、学習ループ

pub mod agent;
pub mod board;
pub mod evaluator;
pub mod learning;
pub mod pattern;
pub mod search;

pub use agent::{Action, Agent, AgentConfig, Strategy};
pub use board::{Board, Direction, Reward};
pub use evaluator::{Evaluator, WeightStore, WeightTable};
pub use pattern::{NTupleConfig, Pattern, PatternError};
