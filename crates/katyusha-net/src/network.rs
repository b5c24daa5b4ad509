//! 学習可能な評価ネットワーク
//!
//! 4 つの入力グループ -> 各グループの全結合層 (ReLU) -> layer1 (ReLU) -> outlayer (tanh)
//! を f32 で実装し、順伝播・逆伝播をサポートする。

use rand::Rng;

use crate::layout::{
    GROUP_OUTPUTS, INPUT_GROUPS, LAYER1_NAME, LAYER1_OUTPUTS, OUTLAYER_NAME, TOTAL_FEATURES,
};

/// 学習可能な全結合層
#[derive(Clone, Debug)]
pub struct Dense {
    inputs: usize,
    outputs: usize,
    /// 重み [outputs][inputs]
    pub weights: Vec<f32>,
    /// バイアス [outputs]
    pub biases: Vec<f32>,
    /// 重みの勾配
    pub weight_grads: Vec<f32>,
    /// バイアスの勾配
    pub bias_grads: Vec<f32>,
}

impl Dense {
    /// 新しい層を作成（ゼロ初期化）
    pub fn new(inputs: usize, outputs: usize) -> Self {
        Self {
            inputs,
            outputs,
            weights: vec![0.0; outputs * inputs],
            biases: vec![0.0; outputs],
            weight_grads: vec![0.0; outputs * inputs],
            bias_grads: vec![0.0; outputs],
        }
    }

    pub fn inputs(&self) -> usize {
        self.inputs
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }

    /// He初期化
    pub fn init_he<R: Rng>(&mut self, rng: &mut R) {
        let std_dev = (2.0 / self.inputs as f32).sqrt();
        for w in &mut self.weights {
            *w = rng.random::<f32>() * 2.0 * std_dev - std_dev;
        }
        self.biases.fill(0.0);
    }

    /// 順伝播
    pub fn forward(&self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), self.inputs);
        debug_assert_eq!(output.len(), self.outputs);

        for (j, out) in output.iter_mut().enumerate() {
            let row = &self.weights[j * self.inputs..(j + 1) * self.inputs];
            let mut sum = self.biases[j];
            for (w, x) in row.iter().zip(input) {
                sum += w * x;
            }
            *out = sum;
        }
    }

    /// 逆伝播（重み勾配を累積し、必要なら入力勾配を計算する）
    pub fn backward(
        &mut self,
        input: &[f32],
        output_grad: &[f32],
        mut input_grad: Option<&mut [f32]>,
    ) {
        debug_assert_eq!(input.len(), self.inputs);
        debug_assert_eq!(output_grad.len(), self.outputs);

        if let Some(ig) = input_grad.as_deref_mut() {
            debug_assert_eq!(ig.len(), self.inputs);
            ig.fill(0.0);
        }

        for (j, &grad) in output_grad.iter().enumerate() {
            if grad == 0.0 {
                continue;
            }
            self.bias_grads[j] += grad;
            let base = j * self.inputs;
            for i in 0..self.inputs {
                self.weight_grads[base + i] += grad * input[i];
            }
            if let Some(ig) = input_grad.as_deref_mut() {
                for i in 0..self.inputs {
                    ig[i] += grad * self.weights[base + i];
                }
            }
        }
    }

    /// 勾配をゼロにリセット
    pub fn zero_grad(&mut self) {
        self.weight_grads.fill(0.0);
        self.bias_grads.fill(0.0);
    }

    /// パラメータ数
    pub fn param_count(&self) -> usize {
        self.outputs * self.inputs + self.outputs
    }
}

#[inline]
pub fn relu(x: f32) -> f32 {
    x.max(0.0)
}

#[inline]
pub fn relu_grad(x: f32) -> f32 {
    if x > 0.0 { 1.0 } else { 0.0 }
}

/// グループ入力型の評価ネットワーク
#[derive(Clone, Debug)]
pub struct KatyushaNetwork {
    /// INPUT_GROUPS と同じ順序
    pub groups: Vec<Dense>,
    pub layer1: Dense,
    pub outlayer: Dense,
}

/// 順伝播時の中間値キャッシュ
#[derive(Clone, Debug)]
pub struct ForwardCache {
    pub group_pre: Vec<f32>,
    pub group_act: Vec<f32>,
    pub l1_pre: Vec<f32>,
    pub l1_act: Vec<f32>,
    pub out: f32,
}

impl ForwardCache {
    pub fn new() -> Self {
        Self {
            group_pre: vec![0.0; GROUP_OUTPUTS],
            group_act: vec![0.0; GROUP_OUTPUTS],
            l1_pre: vec![0.0; LAYER1_OUTPUTS],
            l1_act: vec![0.0; LAYER1_OUTPUTS],
            out: 0.0,
        }
    }
}

impl Default for ForwardCache {
    fn default() -> Self {
        Self::new()
    }
}

impl KatyushaNetwork {
    /// 新しいネットワークを作成（ゼロ初期化）
    pub fn new() -> Self {
        Self {
            groups: INPUT_GROUPS.iter().map(|g| Dense::new(g.width, g.hidden)).collect(),
            layer1: Dense::new(GROUP_OUTPUTS, LAYER1_OUTPUTS),
            outlayer: Dense::new(LAYER1_OUTPUTS, 1),
        }
    }

    /// ランダム初期化
    pub fn init_random<R: Rng>(&mut self, rng: &mut R) {
        for layer in &mut self.groups {
            layer.init_he(rng);
        }
        self.layer1.init_he(rng);
        self.outlayer.init_he(rng);
    }

    /// 入力次元
    pub fn input_width(&self) -> usize {
        TOTAL_FEATURES
    }

    /// 順伝播
    ///
    /// 戻り値は (-1, 1) の出力と逆伝播用キャッシュ。
    pub fn forward(&self, input: &[f32]) -> (f32, ForwardCache) {
        debug_assert_eq!(input.len(), TOTAL_FEATURES);
        let mut cache = ForwardCache::new();

        let mut hidden_offset = 0;
        for (group, layer) in INPUT_GROUPS.iter().zip(&self.groups) {
            let slice = &input[group.offset..group.offset + group.width];
            let pre = &mut cache.group_pre[hidden_offset..hidden_offset + group.hidden];
            layer.forward(slice, pre);
            hidden_offset += group.hidden;
        }
        for (act, &pre) in cache.group_act.iter_mut().zip(&cache.group_pre) {
            *act = relu(pre);
        }

        self.layer1.forward(&cache.group_act, &mut cache.l1_pre);
        for (act, &pre) in cache.l1_act.iter_mut().zip(&cache.l1_pre) {
            *act = relu(pre);
        }

        let mut out = [0.0f32; 1];
        self.outlayer.forward(&cache.l1_act, &mut out);
        cache.out = out[0].tanh();

        (cache.out, cache)
    }

    /// 逆伝播
    ///
    /// `output_grad` は tanh 出力に対する損失勾配。
    pub fn backward(&mut self, input: &[f32], cache: &ForwardCache, output_grad: f32) {
        let out_pre_grad = [output_grad * (1.0 - cache.out * cache.out)];

        let mut l1_act_grad = vec![0.0f32; LAYER1_OUTPUTS];
        self.outlayer.backward(&cache.l1_act, &out_pre_grad, Some(&mut l1_act_grad));

        let l1_pre_grad: Vec<f32> = l1_act_grad
            .iter()
            .zip(&cache.l1_pre)
            .map(|(&g, &pre)| g * relu_grad(pre))
            .collect();

        let mut group_act_grad = vec![0.0f32; GROUP_OUTPUTS];
        self.layer1.backward(&cache.group_act, &l1_pre_grad, Some(&mut group_act_grad));

        let group_pre_grad: Vec<f32> = group_act_grad
            .iter()
            .zip(&cache.group_pre)
            .map(|(&g, &pre)| g * relu_grad(pre))
            .collect();

        let mut hidden_offset = 0;
        for (group, layer) in INPUT_GROUPS.iter().zip(self.groups.iter_mut()) {
            let slice = &input[group.offset..group.offset + group.width];
            let grad = &group_pre_grad[hidden_offset..hidden_offset + group.hidden];
            layer.backward(slice, grad, None);
            hidden_offset += group.hidden;
        }
    }

    /// 勾配をゼロにリセット
    pub fn zero_grad(&mut self) {
        for layer in &mut self.groups {
            layer.zero_grad();
        }
        self.layer1.zero_grad();
        self.outlayer.zero_grad();
    }

    /// 層名付きで全層を列挙する（スナップショット順）
    pub fn layers(&self) -> Vec<(&'static str, &Dense)> {
        let mut out: Vec<(&'static str, &Dense)> =
            INPUT_GROUPS.iter().map(|g| g.name).zip(self.groups.iter()).collect();
        out.push((LAYER1_NAME, &self.layer1));
        out.push((OUTLAYER_NAME, &self.outlayer));
        out
    }

    pub fn layers_mut(&mut self) -> Vec<(&'static str, &mut Dense)> {
        let mut out: Vec<(&'static str, &mut Dense)> =
            INPUT_GROUPS.iter().map(|g| g.name).zip(self.groups.iter_mut()).collect();
        out.push((LAYER1_NAME, &mut self.layer1));
        out.push((OUTLAYER_NAME, &mut self.outlayer));
        out
    }

    /// パラメータ数
    pub fn param_count(&self) -> usize {
        self.layers().iter().map(|(_, l)| l.param_count()).sum()
    }
}

impl Default for KatyushaNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_dense_forward() {
        let mut layer = Dense::new(4, 2);
        layer.weights = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        layer.biases = vec![1.0, 2.0];

        let input = [1.0, 2.0, 3.0, 4.0];
        let mut output = [0.0; 2];
        layer.forward(&input, &mut output);

        // output[0] = 1 + 1 + 4 + 9 + 16 = 31
        // output[1] = 2 + 5 + 12 + 21 + 32 = 72
        assert!((output[0] - 31.0).abs() < 1e-5);
        assert!((output[1] - 72.0).abs() < 1e-5);
    }

    #[test]
    fn test_dense_backward_accumulates() {
        let mut layer = Dense::new(2, 1);
        layer.weights = vec![0.5, -1.0];
        let mut input_grad = [0.0; 2];
        layer.backward(&[2.0, 3.0], &[1.0], Some(&mut input_grad));
        layer.backward(&[2.0, 3.0], &[1.0], None);

        assert_eq!(layer.weight_grads, vec![4.0, 6.0]);
        assert_eq!(layer.bias_grads, vec![2.0]);
        assert_eq!(input_grad, [0.5, -1.0]);

        layer.zero_grad();
        assert!(layer.weight_grads.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_network_forward_zero_weights() {
        let network = KatyushaNetwork::new();
        let (output, cache) = network.forward(&vec![1.0; TOTAL_FEATURES]);
        assert_eq!(output, 0.0);
        assert_eq!(cache.group_act.len(), GROUP_OUTPUTS);
    }

    #[test]
    fn test_param_count() {
        let network = KatyushaNetwork::new();
        let expected = (15 * 20 + 20)
            + (164 * 32 + 32)
            + (128 * 64 + 64)
            + (16 * 20 + 20)
            + (GROUP_OUTPUTS * LAYER1_OUTPUTS + LAYER1_OUTPUTS)
            + (LAYER1_OUTPUTS + 1);
        assert_eq!(network.param_count(), expected);
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut network = KatyushaNetwork::new();
        network.init_random(&mut rng);
        let input: Vec<f32> = (0..TOTAL_FEATURES).map(|i| ((i % 7) as f32) * 0.05).collect();

        let (_, cache) = network.forward(&input);
        network.zero_grad();
        network.backward(&input, &cache, 1.0);
        let analytic = network.outlayer.bias_grads[0];

        let eps = 1e-3;
        let mut plus = network.clone();
        plus.outlayer.biases[0] += eps;
        let mut minus = network.clone();
        minus.outlayer.biases[0] -= eps;
        let numeric = (plus.forward(&input).0 - minus.forward(&input).0) / (2.0 * eps);

        assert!((analytic - numeric).abs() < 1e-3, "analytic={analytic} numeric={numeric}");
    }
}
