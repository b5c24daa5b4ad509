//! 教師あり事前学習（ウォームスタート）
//!
//! 自己対局ログから 1 局につき 1 局面を取り出し、その局面の評価値を
//! 目標にネットワークを回帰させる。
//!
//! - 評価値ファイル: 1 行 1 局、手ごとの評価値（センチポーン）をカンマ区切り
//! - 特徴量ファイル: 1 局につき評価値の個数 + 1 行。j 行目が j 手目の局面

use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use katyusha_net::{Approximator, EVAL_SCALE_CP, FeatureVector, NetResult};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::common::io::open_reader;
use crate::selfplay::decode_features;

/// 学習設定
#[derive(Clone, Debug)]
pub struct BootstrapConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// 末尾から検証用に取り分ける割合
    pub validation_split: f64,
    /// 出力 1.0 に対応するセンチポーン値
    pub eval_scale_cp: f32,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self { epochs: 50, batch_size: 32, validation_split: 0.25, eval_scale_cp: EVAL_SCALE_CP }
    }
}

impl BootstrapConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be >= 1");
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            bail!("validation_split must be in [0, 1), got {}", self.validation_split);
        }
        if !(self.eval_scale_cp.is_finite() && self.eval_scale_cp > 0.0) {
            bail!("eval_scale_cp must be positive, got {}", self.eval_scale_cp);
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Sample {
    pub features: FeatureVector,
    /// 先手視点のセンチポーン値
    pub eval_cp: f32,
}

/// エポックごとの損失（出力単位の平均二乗誤差）
#[derive(Clone, Copy, Debug, Serialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub train_loss: f64,
    pub validation_loss: Option<f64>,
}

fn parse_evals(line: &str) -> Result<Vec<f32>> {
    let values = line
        .trim()
        .split(',')
        .map(|token| {
            let token = token.trim();
            token
                .parse::<f32>()
                .ok()
                .filter(|v| v.is_finite())
                .with_context(|| format!("bad evaluation {token:?}"))
        })
        .collect::<Result<Vec<f32>>>()?;
    Ok(values)
}

fn next_line(lines: &mut io::Lines<Box<dyn BufRead>>, path: &Path, game: usize) -> Result<String> {
    match lines.next() {
        Some(line) => line.with_context(|| format!("failed to read {}", path.display())),
        None => bail!("{} ended inside game {}", path.display(), game),
    }
}

/// 評価値ファイルと特徴量ファイルを並べて読み、1 局につき 1 局面を無作為に選ぶ。
///
/// `.gz` は gzip として読む。
pub fn load_samples<R: Rng + ?Sized>(
    evals_path: &Path,
    features_path: &Path,
    width: usize,
    max_games: Option<usize>,
    rng: &mut R,
) -> Result<Vec<Sample>> {
    let evals_reader = open_reader(evals_path)
        .with_context(|| format!("failed to open {}", evals_path.display()))?;
    let mut feature_lines = open_reader(features_path)
        .with_context(|| format!("failed to open {}", features_path.display()))?
        .lines();

    let mut samples = Vec::new();
    for (idx, line) in evals_reader.lines().enumerate() {
        if max_games.is_some_and(|max| samples.len() >= max) {
            break;
        }
        let game = idx + 1;
        let line = line.with_context(|| format!("failed to read {}", evals_path.display()))?;
        let evals = parse_evals(&line)
            .with_context(|| format!("{}: game {}", evals_path.display(), game))?;

        let pick = rng.random_range(0..evals.len());
        for _ in 0..pick {
            next_line(&mut feature_lines, features_path, game)?;
        }
        let text = next_line(&mut feature_lines, features_path, game)?;
        let features = decode_features(&text, width).with_context(|| {
            format!("{}: game {} position {}", features_path.display(), game, pick)
        })?;
        for _ in pick + 1..=evals.len() {
            next_line(&mut feature_lines, features_path, game)?;
        }
        samples.push(Sample { features, eval_cp: evals[pick] });
    }
    log::info!("loaded {} samples from {}", samples.len(), evals_path.display());
    Ok(samples)
}

/// 末尾の `fraction` を検証用に分ける
pub fn split_validation(mut samples: Vec<Sample>, fraction: f64) -> (Vec<Sample>, Vec<Sample>) {
    let n_val = (samples.len() as f64 * fraction).floor() as usize;
    let validation = samples.split_off(samples.len() - n_val);
    (samples, validation)
}

fn inputs_and_targets(samples: &[Sample], scale: f32) -> (Vec<FeatureVector>, Vec<f32>) {
    samples.iter().map(|s| (s.features.clone(), s.eval_cp / scale)).unzip()
}

fn validation_loss<A: Approximator + ?Sized>(
    approximator: &A,
    samples: &[Sample],
    scale: f32,
) -> NetResult<Option<f64>> {
    if samples.is_empty() {
        return Ok(None);
    }
    let (inputs, targets) = inputs_and_targets(samples, scale);
    let predictions = approximator.predict(&inputs)?;
    let sum: f64 = predictions
        .iter()
        .zip(&targets)
        .map(|(&p, &t)| {
            let d = f64::from(p - t);
            d * d
        })
        .sum();
    Ok(Some(sum / samples.len() as f64))
}

/// `epochs` エポック学習する。中断されたらそのエポックの前で止める。
pub fn train<A: Approximator + ?Sized, R: Rng + ?Sized>(
    approximator: &mut A,
    train_set: &mut [Sample],
    validation: &[Sample],
    cfg: &BootstrapConfig,
    rng: &mut R,
    interrupted: &Arc<AtomicBool>,
) -> Result<Vec<EpochReport>> {
    cfg.validate()?;
    if train_set.is_empty() {
        bail!("no training samples");
    }
    log::info!(
        "training on {} samples ({} for validation), batch size {}, {} epochs",
        train_set.len(),
        validation.len(),
        cfg.batch_size,
        cfg.epochs
    );

    let mut reports = Vec::with_capacity(cfg.epochs);
    for epoch in 1..=cfg.epochs {
        if interrupted.load(Ordering::SeqCst) {
            log::info!("interrupted before epoch {epoch}");
            break;
        }
        train_set.shuffle(rng);

        let mut total = 0.0;
        for chunk in train_set.chunks(cfg.batch_size) {
            let (inputs, targets) = inputs_and_targets(chunk, cfg.eval_scale_cp);
            let loss = approximator
                .train_on_batch(&inputs, &targets)
                .with_context(|| format!("update failed in epoch {epoch}"))?;
            total += f64::from(loss) * chunk.len() as f64;
        }
        let report = EpochReport {
            epoch,
            train_loss: total / train_set.len() as f64,
            validation_loss: validation_loss(&*approximator, validation, cfg.eval_scale_cp)?,
        };
        match report.validation_loss {
            Some(val) => log::info!(
                "epoch {}/{}: loss={:.6} val_loss={:.6}",
                epoch,
                cfg.epochs,
                report.train_loss,
                val
            ),
            None => log::info!("epoch {}/{}: loss={:.6}", epoch, cfg.epochs, report.train_loss),
        }
        reports.push(report);
    }
    Ok(reports)
}
