//! オプティマイザ
//!
//! SGD と Adagrad を実装する。

use serde::{Deserialize, Serialize};

use crate::network::KatyushaNetwork;

/// オプティマイザ trait
pub trait Optimizer {
    /// 累積済みの勾配でパラメータを更新
    fn step(&mut self, network: &mut KatyushaNetwork);

    /// 学習率を設定
    fn set_lr(&mut self, lr: f32);

    /// 現在の学習率を取得
    fn get_lr(&self) -> f32;
}

/// 設定ファイルから選択するオプティマイザ種別
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Sgd,
    Adagrad,
}

impl OptimizerKind {
    pub fn build(self, network: &KatyushaNetwork, lr: f32) -> Box<dyn Optimizer> {
        match self {
            OptimizerKind::Sgd => Box::new(Sgd::new(lr)),
            OptimizerKind::Adagrad => Box::new(Adagrad::new(network, lr)),
        }
    }
}

/// 確率的勾配降下法
pub struct Sgd {
    pub lr: f32,
}

impl Sgd {
    pub fn new(lr: f32) -> Self {
        Self { lr }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, network: &mut KatyushaNetwork) {
        for (_, layer) in network.layers_mut() {
            for (w, g) in layer.weights.iter_mut().zip(&layer.weight_grads) {
                *w -= self.lr * g;
            }
            for (b, g) in layer.biases.iter_mut().zip(&layer.bias_grads) {
                *b -= self.lr * g;
            }
        }
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn get_lr(&self) -> f32 {
        self.lr
    }
}

/// Adagrad オプティマイザ
pub struct Adagrad {
    pub lr: f32,
    /// 数値安定性のための小さな値
    pub epsilon: f32,
    /// 層ごとの二乗勾配累積 (重み, バイアス)。layers_mut() と同じ順序
    accum: Vec<(Vec<f32>, Vec<f32>)>,
}

impl Adagrad {
    pub fn new(network: &KatyushaNetwork, lr: f32) -> Self {
        let accum = network
            .layers()
            .iter()
            .map(|(_, l)| (vec![0.0; l.weights.len()], vec![0.0; l.biases.len()]))
            .collect();
        Self { lr, epsilon: 1e-8, accum }
    }
}

/// Adagradの更新式を適用（借用エラー回避のため独立関数として実装）
fn adagrad_update_params(params: &mut [f32], grads: &[f32], accum: &mut [f32], lr: f32, epsilon: f32) {
    for i in 0..params.len() {
        let g = grads[i];
        accum[i] += g * g;
        params[i] -= lr * g / (accum[i].sqrt() + epsilon);
    }
}

impl Optimizer for Adagrad {
    fn step(&mut self, network: &mut KatyushaNetwork) {
        for ((_, layer), (acc_w, acc_b)) in network.layers_mut().into_iter().zip(&mut self.accum) {
            adagrad_update_params(&mut layer.weights, &layer.weight_grads, acc_w, self.lr, self.epsilon);
            adagrad_update_params(&mut layer.biases, &layer.bias_grads, acc_b, self.lr, self.epsilon);
        }
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn get_lr(&self) -> f32 {
        self.lr
    }
}
