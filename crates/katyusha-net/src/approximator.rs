//! 評価関数近似器
//!
//! 学習ループからはこの trait 越しにだけ近似器を操作する。

use std::path::Path;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{NetError, NetResult};
use crate::network::KatyushaNetwork;
use crate::optimizer::{Optimizer, OptimizerKind};
use crate::snapshot::{LayerWeights, WeightSnapshot};

/// 1 局面分の特徴量ベクトル
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// 教師あり回帰の口だけを持つ近似器
pub trait Approximator {
    /// 特徴量ベクトルの幅
    fn input_width(&self) -> usize;

    /// 現在の予測値（出力単位）
    fn predict(&self, inputs: &[FeatureVector]) -> NetResult<Vec<f32>>;

    /// 目標値に向けて 1 ステップだけ更新し、更新前の平均二乗誤差を返す
    fn train_on_batch(&mut self, inputs: &[FeatureVector], targets: &[f32]) -> NetResult<f32>;

    fn snapshot(&self) -> WeightSnapshot;

    fn restore(&mut self, snapshot: &WeightSnapshot) -> NetResult<()>;

    fn save(&self, path: &Path) -> NetResult<()> {
        self.snapshot().save(path)
    }

    fn load(&mut self, path: &Path) -> NetResult<()> {
        let snapshot = WeightSnapshot::load(path)?;
        self.restore(&snapshot)
    }
}

/// [`KatyushaNetwork`] とオプティマイザを束ねた近似器
pub struct NetworkApproximator {
    network: KatyushaNetwork,
    optimizer: Box<dyn Optimizer>,
}

impl NetworkApproximator {
    pub fn new(network: KatyushaNetwork, optimizer: Box<dyn Optimizer>) -> Self {
        Self { network, optimizer }
    }

    /// シード付き乱数で初期化したネットワークから作る
    pub fn with_seed(seed: u64, kind: OptimizerKind, lr: f32) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut network = KatyushaNetwork::new();
        network.init_random(&mut rng);
        let optimizer = kind.build(&network, lr);
        Self::new(network, optimizer)
    }

    pub fn network(&self) -> &KatyushaNetwork {
        &self.network
    }

    fn check_width(&self, input: &FeatureVector) -> NetResult<()> {
        let expected = self.network.input_width();
        if input.len() != expected {
            return Err(NetError::WidthMismatch { expected, actual: input.len() });
        }
        Ok(())
    }
}

impl Approximator for NetworkApproximator {
    fn input_width(&self) -> usize {
        self.network.input_width()
    }

    fn predict(&self, inputs: &[FeatureVector]) -> NetResult<Vec<f32>> {
        inputs
            .iter()
            .map(|input| {
                self.check_width(input)?;
                Ok(self.network.forward(input.as_slice()).0)
            })
            .collect()
    }

    fn train_on_batch(&mut self, inputs: &[FeatureVector], targets: &[f32]) -> NetResult<f32> {
        if inputs.len() != targets.len() {
            return Err(NetError::BatchMismatch { inputs: inputs.len(), targets: targets.len() });
        }
        if inputs.is_empty() {
            return Ok(0.0);
        }
        for input in inputs {
            self.check_width(input)?;
        }

        let n = inputs.len() as f32;
        let mut loss = 0.0f32;
        self.network.zero_grad();
        for (input, &target) in inputs.iter().zip(targets) {
            let (output, cache) = self.network.forward(input.as_slice());
            let diff = output - target;
            loss += diff * diff;
            // d/dy mean((y - t)^2)
            self.network.backward(input.as_slice(), &cache, 2.0 * diff / n);
        }
        self.optimizer.step(&mut self.network);
        Ok(loss / n)
    }

    fn snapshot(&self) -> WeightSnapshot {
        let layers = self
            .network
            .layers()
            .into_iter()
            .map(|(name, layer)| LayerWeights {
                name: name.to_string(),
                rows: layer.outputs(),
                cols: layer.inputs(),
                weights: layer.weights.clone(),
                biases: layer.biases.clone(),
            })
            .collect();
        WeightSnapshot { layers }
    }

    fn restore(&mut self, snapshot: &WeightSnapshot) -> NetResult<()> {
        // 形状を全層確認してから書き換える
        for (name, layer) in self.network.layers() {
            let saved = snapshot.layer(name).ok_or_else(|| NetError::MissingLayer(name.to_string()))?;
            if saved.rows != layer.outputs() || saved.cols != layer.inputs() {
                return Err(NetError::ShapeMismatch {
                    name: name.to_string(),
                    expected_rows: layer.outputs(),
                    expected_cols: layer.inputs(),
                    rows: saved.rows,
                    cols: saved.cols,
                });
            }
        }
        for (name, layer) in self.network.layers_mut() {
            if let Some(saved) = snapshot.layer(name) {
                layer.weights.copy_from_slice(&saved.weights);
                layer.biases.copy_from_slice(&saved.biases);
            }
        }
        Ok(())
    }
}
