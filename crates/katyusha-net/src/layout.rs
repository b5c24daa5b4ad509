//! 入力特徴量のレイアウトとネットワーク定数
//!
//! 特徴量ベクトルは 4 つのグループを連結したもので、各グループは
//! 専用の全結合層 (ReLU) に入る。グループの並び順はエンジンが出力する
//! 特徴量文字列の並び順と一致していなければならない。

/// 入力特徴量グループ
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputGroup {
    /// スナップショット上の層名
    pub name: &'static str,
    /// 特徴量ベクトル内の開始位置
    pub offset: usize,
    /// 入力次元
    pub width: usize,
    /// グループ層の出力次元
    pub hidden: usize,
}

/// 手番・キャスリング権・駒数
pub const GLOBAL_FEATURES: usize = 15;
/// 駒ごとの位置・利き情報
pub const PIECE_FEATURES: usize = 164;
/// 2 枚の 64 マス盤面マップ
pub const SQUARE_FEATURES: usize = 128;
/// 筋ごとのポーン (8 筋 x 2 色)
pub const PAWN_FEATURES: usize = 16;

pub const TOTAL_FEATURES: usize =
    GLOBAL_FEATURES + PIECE_FEATURES + SQUARE_FEATURES + PAWN_FEATURES;

pub const INPUT_GROUPS: [InputGroup; 4] = [
    InputGroup { name: "global", offset: 0, width: GLOBAL_FEATURES, hidden: 20 },
    InputGroup { name: "piece", offset: GLOBAL_FEATURES, width: PIECE_FEATURES, hidden: 32 },
    InputGroup {
        name: "square",
        offset: GLOBAL_FEATURES + PIECE_FEATURES,
        width: SQUARE_FEATURES,
        hidden: 64,
    },
    InputGroup {
        name: "pawn",
        offset: GLOBAL_FEATURES + PIECE_FEATURES + SQUARE_FEATURES,
        width: PAWN_FEATURES,
        hidden: 20,
    },
];

/// グループ層出力の連結次元
pub const GROUP_OUTPUTS: usize = 20 + 32 + 64 + 20;
pub const LAYER1_OUTPUTS: usize = 100;

pub const LAYER1_NAME: &str = "layer1";
pub const OUTLAYER_NAME: &str = "outlayer";

/// スナップショットに書き出す層の順序
pub const LAYER_NAMES: [&str; 6] = ["global", "piece", "square", "pawn", LAYER1_NAME, OUTLAYER_NAME];

/// ネットワーク出力 1.0 に対応するセンチポーン値
///
/// エンジン側は出力を 50 ポーン分にスケールして評価値とする。
pub const EVAL_SCALE_CP: f32 = 5000.0;
