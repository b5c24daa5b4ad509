//! 誤差信号から教師データを作り、近似器を 1 回更新する。
//!
//! 近似器は「目標値に近づける」口しか持たないので、現在の予測値に
//! 誤差を足したものを目標値として与える。

use katyusha_net::{Approximator, FeatureVector, NetResult};
use serde::{Deserialize, Serialize};

use super::lambda::compute_errors;
use crate::selfplay::EpisodeTrace;

/// どの (特徴量, 誤差) の組をバッチに入れるか
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditPolicy {
    /// エピソードごとに初手の誤差だけを使う
    WholeEpisode,
    /// 記録した全手の誤差を使う
    #[default]
    PerPly,
}

/// エピソードとその誤差信号（実際に指した手数と同じ長さ）
#[derive(Clone, Debug)]
pub struct EpisodeSignal {
    pub trace: EpisodeTrace,
    pub errors: Vec<f64>,
}

impl EpisodeSignal {
    pub fn new(trace: EpisodeTrace, lambda: f64) -> Self {
        let mut errors = compute_errors(&trace.evals, lambda);
        errors.truncate(trace.played_plies());
        Self { trace, errors }
    }
}

/// 1 回の更新に使うデータ一式
#[derive(Default)]
pub struct Batch {
    pub episodes: Vec<EpisodeSignal>,
    pub inputs: Vec<FeatureVector>,
    /// センチポーン単位の誤差
    pub errors: Vec<f64>,
}

impl Batch {
    pub fn assemble(episodes: Vec<EpisodeSignal>, policy: CreditPolicy) -> Self {
        let mut inputs = Vec::new();
        let mut errors = Vec::new();
        for episode in &episodes {
            let rows = episode.trace.records.iter().zip(&episode.errors);
            let take = match policy {
                CreditPolicy::WholeEpisode => 1,
                CreditPolicy::PerPly => episode.errors.len(),
            };
            for (record, &error) in rows.take(take) {
                if let Some(fv) = &record.features {
                    inputs.push(fv.clone());
                    errors.push(error);
                }
            }
        }
        Self { episodes, inputs, errors }
    }

    pub fn rows(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// 更新 1 回分の観測値。誤差は評価スケールで正規化済み。
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub rows: usize,
    /// 平均絶対誤差 (l1 loss)
    pub avg_abs_error: f64,
    /// 平均二乗誤差 (l2 loss)
    pub avg_sq_error: f64,
    /// 更新前の近似器の平均二乗誤差
    pub train_loss: f32,
}

/// `target = prediction + error / eval_scale` で 1 ステップ学習する。
pub fn issue_update<A: Approximator + ?Sized>(
    approximator: &mut A,
    batch: &Batch,
    eval_scale_cp: f64,
) -> NetResult<BatchReport> {
    if batch.is_empty() {
        return Ok(BatchReport::default());
    }
    let scaled: Vec<f64> = batch.errors.iter().map(|e| e / eval_scale_cp).collect();
    let predictions = approximator.predict(&batch.inputs)?;
    let targets: Vec<f32> =
        predictions.iter().zip(&scaled).map(|(&p, &e)| (f64::from(p) + e) as f32).collect();
    let train_loss = approximator.train_on_batch(&batch.inputs, &targets)?;

    let n = scaled.len() as f64;
    Ok(BatchReport {
        rows: scaled.len(),
        avg_abs_error: scaled.iter().map(|e| e.abs()).sum::<f64>() / n,
        avg_sq_error: scaled.iter().map(|e| e * e).sum::<f64>() / n,
        train_loss,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selfplay::{EpisodeEnd, EvalRecord, PositionRecord};
    use katyusha_net::{NetError, WeightSnapshot};

    fn trace(evals: &[f32], played: usize, with_features: bool) -> EpisodeTrace {
        let records = (0..played)
            .map(|ply| PositionRecord {
                ply,
                eval: EvalRecord::default(),
                absolute_cp: evals[ply],
                features: with_features.then(|| FeatureVector::new(vec![ply as f32, 1.0])),
            })
            .collect();
        EpisodeTrace { records, evals: evals.to_vec(), end: EpisodeEnd::MaxMoves }
    }

    /// 予測値は常に一定、受け取った目標値を記録するだけの近似器
    struct RecordingApproximator {
        prediction: f32,
        seen_targets: Vec<f32>,
    }

    impl Approximator for RecordingApproximator {
        fn input_width(&self) -> usize {
            2
        }
        fn predict(&self, inputs: &[FeatureVector]) -> NetResult<Vec<f32>> {
            Ok(vec![self.prediction; inputs.len()])
        }
        fn train_on_batch(&mut self, inputs: &[FeatureVector], targets: &[f32]) -> NetResult<f32> {
            if inputs.len() != targets.len() {
                return Err(NetError::BatchMismatch { inputs: inputs.len(), targets: targets.len() });
            }
            self.seen_targets = targets.to_vec();
            Ok(0.0)
        }
        fn snapshot(&self) -> WeightSnapshot {
            WeightSnapshot::default()
        }
        fn restore(&mut self, _snapshot: &WeightSnapshot) -> NetResult<()> {
            Ok(())
        }
    }

    #[test]
    fn error_signal_matches_played_plies() {
        let signal = EpisodeSignal::new(trace(&[10.0, 30.0, 30.0, 30.0], 2, true), 0.5);
        assert_eq!(signal.errors, vec![20.0, 0.0]);
    }

    #[test]
    fn policies_select_rows() {
        let episodes = vec![
            EpisodeSignal::new(trace(&[0.0, 100.0, 50.0], 3, true), 0.0),
            EpisodeSignal::new(trace(&[0.0, -40.0, -40.0], 2, true), 0.0),
        ];

        let per_ply = Batch::assemble(episodes.clone(), CreditPolicy::PerPly);
        assert_eq!(per_ply.rows(), 5);
        assert_eq!(per_ply.errors, vec![100.0, -50.0, 0.0, -40.0, 0.0]);

        let whole = Batch::assemble(episodes, CreditPolicy::WholeEpisode);
        assert_eq!(whole.rows(), 2);
        assert_eq!(whole.errors, vec![100.0, -40.0]);
        assert_eq!(whole.inputs[1].as_slice(), &[0.0, 1.0]);
    }

    #[test]
    fn rows_without_features_are_skipped() {
        let episodes = vec![EpisodeSignal::new(trace(&[0.0, 10.0], 2, false), 0.0)];
        let batch = Batch::assemble(episodes, CreditPolicy::PerPly);
        assert!(batch.is_empty());
    }

    #[test]
    fn targets_are_prediction_plus_scaled_error() {
        let episodes = vec![EpisodeSignal::new(trace(&[0.0, 500.0, 0.0], 3, true), 0.0)];
        let batch = Batch::assemble(episodes, CreditPolicy::PerPly);
        let mut approx = RecordingApproximator { prediction: 0.25, seen_targets: Vec::new() };

        let report = issue_update(&mut approx, &batch, 1000.0).unwrap();

        assert_eq!(approx.seen_targets, vec![0.75, -0.25, 0.25]);
        assert_eq!(report.rows, 3);
        assert!((report.avg_abs_error - (0.5 + 0.5 + 0.0) / 3.0).abs() < 1e-12);
        assert!((report.avg_sq_error - (0.25 + 0.25) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_batch_skips_update() {
        let mut approx = RecordingApproximator { prediction: 0.0, seen_targets: vec![9.0] };
        let report = issue_update(&mut approx, &Batch::default(), 5000.0).unwrap();
        assert_eq!(report, BatchReport::default());
        assert_eq!(approx.seen_targets, vec![9.0]);
    }
}
