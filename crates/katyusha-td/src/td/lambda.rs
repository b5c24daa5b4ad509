//! TD(λ) 誤差
//!
//! `diff[j] = evals[j+1] - evals[j]` として
//! `error[t] = Σ_{j=t}^{N-2} diff[j] * λ^(j-t)`、末尾は 0。

/// 評価値列から各時点の TD(λ) 誤差を計算する。
///
/// 各 `t` について `j` の昇順に f64 で累積する。
pub fn compute_errors(evals: &[f32], lambda: f64) -> Vec<f64> {
    let n = evals.len();
    (0..n)
        .map(|t| {
            let mut sum = 0.0f64;
            let mut decay = 1.0f64;
            for j in t..n.saturating_sub(1) {
                let diff = f64::from(evals[j + 1]) - f64::from(evals[j]);
                sum += diff * decay;
                decay *= lambda;
            }
            sum
        })
        .collect()
}
