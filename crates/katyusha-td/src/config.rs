//! 学習ループの設定ファイル

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use katyusha_net::{EVAL_SCALE_CP, OptimizerKind};
use serde::{Deserialize, Serialize};

use crate::selfplay::{EngineConfig, SearchLimit};
use crate::td::CreditPolicy;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub engine: EngineConfig,
    /// 開始局面ファイル。未指定なら平手のみ
    pub positions: Option<PathBuf>,
    /// 1 エピソードの最大手数
    pub num_moves: usize,
    pub search_limit: SearchLimit,
    pub lambda: f64,
    /// 1 回の更新に使うエピソード数
    pub batch_size: usize,
    pub max_batches: u64,
    pub credit_policy: CreditPolicy,
    pub learning_rate: f32,
    pub optimizer: OptimizerKind,
    /// 出力 1.0 に対応するセンチポーン値
    pub eval_scale_cp: f64,
    pub checkpoint_dir: PathBuf,
    /// エンジンが読む重みファイル
    pub weights_path: PathBuf,
    /// 何バッチごとにバージョン付きチェックポイントを残すか
    pub checkpoint_interval: u64,
    pub seed: Option<u64>,
    /// 初期重み。未指定ならシードから初期化
    pub init_weights: Option<PathBuf>,
    /// checkpoint_dir の最新チェックポイントから再開する
    pub resume: bool,
    /// バッチごとの JSONL レポート出力先
    pub report_path: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            positions: None,
            num_moves: 12,
            search_limit: SearchLimit::default(),
            lambda: 0.7,
            batch_size: 16,
            max_batches: 100,
            credit_policy: CreditPolicy::default(),
            learning_rate: 0.01,
            optimizer: OptimizerKind::Adagrad,
            eval_scale_cp: f64::from(EVAL_SCALE_CP),
            checkpoint_dir: PathBuf::from("checkpoints"),
            weights_path: PathBuf::from("weights/current.bin"),
            checkpoint_interval: 1,
            seed: None,
            init_weights: None,
            resume: false,
            report_path: None,
        }
    }
}

impl TrainingConfig {
    /// 拡張子で形式を判定して読み込む（toml / json）
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let ext = path.extension().and_then(|s| s.to_str()).map(|s| s.to_ascii_lowercase());
        let cfg: Self = match ext.as_deref() {
            Some("json") => serde_json::from_str(&data)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            _ => toml::from_str(&data)
                .with_context(|| format!("failed to parse {}", path.display()))?,
        };
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.lambda) {
            bail!("lambda must be in [0, 1], got {}", self.lambda);
        }
        if self.num_moves == 0 {
            bail!("num_moves must be >= 1");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be >= 1");
        }
        if self.checkpoint_interval == 0 {
            bail!("checkpoint_interval must be >= 1");
        }
        if !(self.eval_scale_cp.is_finite() && self.eval_scale_cp > 0.0) {
            bail!("eval_scale_cp must be positive, got {}", self.eval_scale_cp);
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            bail!("learning_rate must be positive, got {}", self.learning_rate);
        }
        Ok(())
    }
}
