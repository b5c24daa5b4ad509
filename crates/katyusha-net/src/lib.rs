//! Katyusha 評価ネットワーク
//!
//! TD(λ) 学習ループが使う関数近似器の実装。
//!
//! - `layout`: 入力特徴量グループと定数
//! - `network`: 順伝播・逆伝播
//! - `optimizer`: SGD / Adagrad
//! - `approximator`: 学習ループから見える `Approximator` trait
//! - `snapshot`: 重みスナップショットの保存と原子的な公開

pub mod approximator;
pub mod error;
pub mod layout;
pub mod network;
pub mod optimizer;
pub mod snapshot;

pub use approximator::{Approximator, FeatureVector, NetworkApproximator};
pub use error::{NetError, NetResult};
pub use layout::{EVAL_SCALE_CP, TOTAL_FEATURES};
pub use network::KatyushaNetwork;
pub use optimizer::{Optimizer, OptimizerKind};
pub use snapshot::{LayerWeights, SnapshotStore, WeightSnapshot, publish_atomic};
