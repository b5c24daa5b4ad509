//! UCI エンジンを自己対局させて評価関数を TD(λ) で学習する
//!
//! - `selfplay`: エンジンプロセスの操作とエピソード生成
//! - `td`: TD(λ) 誤差と近似器の更新
//! - `orchestrator`: バッチ単位の学習ループ
//! - `bootstrap`: 評価値ログからの教師あり事前学習

pub mod bootstrap;
pub mod common;
pub mod config;
pub mod orchestrator;
pub mod selfplay;
pub mod td;

pub use config::TrainingConfig;
pub use orchestrator::{Orchestrator, RunStats};
