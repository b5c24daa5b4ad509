//! 学習ループ本体
//!
//! 開始局面を巡回しながらエピソードを集め、1 バッチごとに近似器を更新し、
//! 新しい重みをエンジンに読み直させる。

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use katyusha_net::{Approximator, SnapshotStore};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::common::io::JsonlWriter;
use crate::common::logging::LOSS_TARGET;
use crate::config::TrainingConfig;
use crate::selfplay::{
    EpisodeConfig, EpisodeEnd, EpisodeError, EpisodeTrace, ParsedPosition, SearchEngine,
    describe_position, run_episode,
};
use crate::td::{Batch, BatchReport, EpisodeSignal, issue_update};

/// 実行中の集計
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunStats {
    pub batches: u64,
    pub episodes: u64,
    /// 特徴量のデコードに失敗して捨てたエピソード
    pub skipped_decode: u64,
    /// 開始局面が不正で捨てたエピソード
    pub skipped_start: u64,
    /// 1 手も記録できなかったエピソード
    pub empty_episodes: u64,
    /// 特徴量が付いていなかったエピソード
    pub no_features: u64,
    pub held_last_value: u64,
    pub terminal: u64,
    pub timeouts: u64,
    pub rows_trained: u64,
}

impl RunStats {
    fn record_end(&mut self, trace: &EpisodeTrace) {
        match trace.end {
            EpisodeEnd::Terminal => self.terminal += 1,
            EpisodeEnd::TimedOut => {
                self.timeouts += 1;
                self.held_last_value += 1;
            }
            end if end.is_hold_last_value() => self.held_last_value += 1,
            _ => {}
        }
    }
}

/// JSONL レポートの 1 行
#[derive(Serialize)]
struct BatchRecord {
    timestamp: String,
    version: u64,
    episodes: usize,
    #[serde(flatten)]
    report: BatchReport,
}

pub struct Orchestrator<E: SearchEngine, A: Approximator> {
    engine: E,
    approximator: A,
    store: SnapshotStore,
    positions: Vec<ParsedPosition>,
    order: Vec<usize>,
    cursor: usize,
    rng: ChaCha8Rng,
    cfg: TrainingConfig,
    stats: RunStats,
    report: Option<JsonlWriter>,
    interrupted: Arc<AtomicBool>,
    /// 最後に公開した重みのバージョン
    version: u64,
}

impl<E: SearchEngine, A: Approximator> Orchestrator<E, A> {
    /// 開始局面が空なら平手だけを使う。
    pub fn new(
        engine: E,
        approximator: A,
        positions: Vec<ParsedPosition>,
        cfg: TrainingConfig,
        interrupted: Arc<AtomicBool>,
    ) -> Result<Self> {
        cfg.validate()?;
        let store = SnapshotStore::new(&cfg.checkpoint_dir, &cfg.weights_path)
            .context("failed to prepare snapshot directories")?;
        let report = cfg
            .report_path
            .as_ref()
            .map(|p| JsonlWriter::open(p).with_context(|| format!("failed to open {}", p.display())))
            .transpose()?;
        let positions = if positions.is_empty() { vec![ParsedPosition::startpos()] } else { positions };

        let seed = cfg.seed.unwrap_or_else(rand::random);
        log::info!("shuffle seed: {seed}");
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..positions.len()).collect();
        order.shuffle(&mut rng);

        Ok(Self {
            engine,
            approximator,
            store,
            positions,
            order,
            cursor: 0,
            rng,
            cfg,
            stats: RunStats::default(),
            report,
            interrupted,
            version: 0,
        })
    }

    /// 再開時のバージョン番号を設定する
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn approximator(&self) -> &A {
        &self.approximator
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// ハンドシェイク、学習モードの有効化、初期重みの公開
    pub fn prepare(&mut self) -> Result<()> {
        self.engine.initialize()?;
        let learning_option = self.cfg.engine.learning_option.clone();
        self.engine.set_option(&learning_option, "true")?;
        if !self.engine.reports_features() {
            log::warn!("[{}] engine is not in learning mode", self.engine.label());
        }
        self.publish_weights()
    }

    fn publish_weights(&mut self) -> Result<()> {
        let snapshot = self.approximator.snapshot();
        let published = self.store.publish(&snapshot).context("failed to publish weights")?;
        let path = std::path::absolute(published).unwrap_or_else(|_| published.to_path_buf());
        self.engine.set_option(&self.cfg.engine.weights_option, &path.display().to_string())?;
        self.engine.sync_ready()?;
        log::debug!("published weights v{} to {}", self.version, path.display());
        Ok(())
    }

    fn checkpoint(&self) -> Result<PathBuf> {
        let snapshot = self.approximator.snapshot();
        let path = self
            .store
            .checkpoint(&snapshot, self.version)
            .with_context(|| format!("failed to write checkpoint v{}", self.version))?;
        log::info!("checkpoint: {}", path.display());
        Ok(path)
    }

    /// シャッフル済みの順に開始局面を返す。一巡したらシャッフルし直す。
    fn next_position(&mut self) -> ParsedPosition {
        if self.cursor >= self.order.len() {
            self.order.shuffle(&mut self.rng);
            self.cursor = 0;
            log::debug!("start position pool reshuffled");
        }
        let idx = self.order[self.cursor];
        self.cursor += 1;
        self.positions[idx].clone()
    }

    fn episode_config(&self) -> EpisodeConfig {
        EpisodeConfig {
            num_moves: self.cfg.num_moves,
            limit: self.cfg.search_limit,
            feature_width: self.approximator.input_width(),
        }
    }

    /// エピソードを `batch_size` 本集めて 1 回更新する。
    ///
    /// 途中で中断されたら更新せずに `None` を返す。
    pub fn run_batch(&mut self) -> Result<Option<BatchReport>> {
        let ep_cfg = self.episode_config();
        let mut signals = Vec::with_capacity(self.cfg.batch_size);

        for _ in 0..self.cfg.batch_size {
            if self.interrupted.load(Ordering::SeqCst) {
                log::info!("interrupted: discarding partial batch ({} episodes)", signals.len());
                return Ok(None);
            }
            let start = self.next_position();
            self.engine.new_game()?;
            self.stats.episodes += 1;
            let trace = match run_episode(&mut self.engine, &start, &ep_cfg) {
                Ok(trace) => trace,
                Err(EpisodeError::Engine(e)) => {
                    return Err(e.context(format!("engine failed on {}", describe_position(&start))));
                }
                Err(err @ EpisodeError::Decode { .. }) => {
                    log::warn!("skipping episode from {}: {err}", describe_position(&start));
                    self.stats.skipped_decode += 1;
                    continue;
                }
                Err(err @ EpisodeError::StartPosition(_)) => {
                    log::warn!("skipping episode: {err}");
                    self.stats.skipped_start += 1;
                    continue;
                }
            };

            self.stats.record_end(&trace);
            if trace.is_empty() {
                self.stats.empty_episodes += 1;
                continue;
            }
            if !trace.has_features() {
                self.stats.no_features += 1;
                continue;
            }
            signals.push(EpisodeSignal::new(trace, self.cfg.lambda));
        }

        let batch = Batch::assemble(signals, self.cfg.credit_policy);
        if batch.is_empty() {
            log::warn!("batch has no usable rows; skipping update");
            return Ok(Some(BatchReport::default()));
        }

        let report = issue_update(&mut self.approximator, &batch, self.cfg.eval_scale_cp)
            .context("approximator update failed")?;
        log::info!(target: LOSS_TARGET, "l1 loss {}", report.avg_abs_error);
        log::info!(target: LOSS_TARGET, "l2 loss {}", report.avg_sq_error);

        self.version += 1;
        self.stats.batches += 1;
        self.stats.rows_trained += report.rows as u64;
        if self.version % self.cfg.checkpoint_interval == 0 {
            self.checkpoint()?;
        }
        self.publish_weights()?;

        if let Some(writer) = self.report.as_mut() {
            let record = BatchRecord {
                timestamp: Utc::now().to_rfc3339(),
                version: self.version,
                episodes: batch.episodes.len(),
                report,
            };
            writer.write_record(&record).context("failed to write batch report")?;
        }
        Ok(Some(report))
    }

    /// 学習ループ全体。終了時にエンジンを停止する。
    pub fn run(&mut self) -> Result<RunStats> {
        self.prepare()?;
        let result = self.run_batches();
        if let Err(e) = self.engine.shutdown() {
            log::warn!("engine shutdown failed: {e:#}");
        }
        if let Some(writer) = self.report.take() {
            writer.close()?;
        }
        result?;
        Ok(self.stats.clone())
    }

    fn run_batches(&mut self) -> Result<()> {
        for batch_no in 0..self.cfg.max_batches {
            if self.interrupted.load(Ordering::SeqCst) {
                break;
            }
            log::info!("batch {}/{}", batch_no + 1, self.cfg.max_batches);
            if self.run_batch()?.is_none() {
                break;
            }
        }
        // 最後のバージョンは間隔に関係なく残す
        if self.stats.batches > 0 && self.version % self.cfg.checkpoint_interval != 0 {
            self.checkpoint()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selfplay::testing::{Reply, ScriptedEngine};
    use crate::selfplay::SearchLimit;
    use katyusha_net::{NetworkApproximator, OptimizerKind, TOTAL_FEATURES};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn features(value: f32) -> String {
        vec![value.to_string(); TOTAL_FEATURES].join(",")
    }

    fn config(dir: &TempDir, batch_size: usize, num_moves: usize) -> TrainingConfig {
        TrainingConfig {
            num_moves,
            batch_size,
            max_batches: 1,
            search_limit: SearchLimit::MoveTime(10),
            checkpoint_dir: dir.path().join("ckpt"),
            weights_path: dir.path().join("weights").join("current.bin"),
            seed: Some(7),
            ..Default::default()
        }
    }

    fn approximator() -> NetworkApproximator {
        NetworkApproximator::with_seed(1, OptimizerKind::Sgd, 0.01)
    }

    fn opening(cp: i32) -> Vec<Reply> {
        vec![
            Reply::cp(cp, "e2e4").with_features(&features(0.5)),
            Reply::cp(cp, "e7e5").with_features(&features(0.25)),
        ]
    }

    fn orchestrator(
        engine: ScriptedEngine,
        cfg: TrainingConfig,
    ) -> Orchestrator<ScriptedEngine, NetworkApproximator> {
        Orchestrator::new(engine, approximator(), Vec::new(), cfg, Arc::new(AtomicBool::new(false)))
            .unwrap()
    }

    #[test]
    fn one_batch_trains_checkpoints_and_reloads() {
        let dir = TempDir::new().unwrap();
        let mut replies = opening(40);
        replies.extend(opening(-60));
        let mut orch = orchestrator(ScriptedEngine::new(replies), config(&dir, 2, 2));

        let stats = orch.run().unwrap();

        assert_eq!(stats.batches, 1);
        assert_eq!(stats.episodes, 2);
        assert_eq!(stats.rows_trained, 4);
        assert!(dir.path().join("ckpt").join("td_batch_000001.bin").exists());
        assert!(dir.path().join("weights").join("current.bin").exists());

        let options = orch.engine().options();
        assert_eq!(options[0], ("Learning".to_string(), "true".to_string()));
        let reloads = options.iter().filter(|(name, _)| name == "WeightsFile").count();
        // 初期公開 + バッチ後
        assert_eq!(reloads, 2);
    }

    #[test]
    fn malformed_features_skip_only_that_episode() {
        let dir = TempDir::new().unwrap();
        let mut replies = vec![Reply::cp(10, "e2e4").with_features("1.0,,3.0")];
        replies.extend(opening(20));
        let mut orch = orchestrator(ScriptedEngine::new(replies), config(&dir, 2, 2));

        orch.prepare().unwrap();
        let report = orch.run_batch().unwrap().unwrap();

        assert_eq!(orch.stats().skipped_decode, 1);
        assert_eq!(report.rows, 2);
        assert_eq!(orch.version(), 1);
    }

    #[test]
    fn timed_out_episode_is_counted_and_still_trained() {
        let dir = TempDir::new().unwrap();
        let mut replies =
            vec![Reply::cp(15, "e2e4").with_features(&features(0.5)), Reply::timed_out()];
        replies.extend(opening(20));
        let mut orch = orchestrator(ScriptedEngine::new(replies), config(&dir, 2, 2));

        orch.prepare().unwrap();
        let report = orch.run_batch().unwrap().unwrap();

        let stats = orch.stats();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.held_last_value, 1);
        assert_eq!(stats.terminal, 0);
        // タイムアウトしたエピソードは記録済みの 1 手だけ学習に使う
        assert_eq!(report.rows, 3);
        assert_eq!(orch.version(), 1);
    }

    #[test]
    fn episodes_without_score_skip_the_update() {
        let dir = TempDir::new().unwrap();
        let mut orch = orchestrator(ScriptedEngine::new(Vec::new()), config(&dir, 3, 4));

        orch.prepare().unwrap();
        let report = orch.run_batch().unwrap().unwrap();

        assert_eq!(report, BatchReport::default());
        assert_eq!(orch.stats().empty_episodes, 3);
        assert_eq!(orch.version(), 0);
        assert!(!dir.path().join("ckpt").join("td_batch_000001.bin").exists());
    }

    #[test]
    fn interrupt_discards_partial_batch() {
        let dir = TempDir::new().unwrap();
        let flag = Arc::new(AtomicBool::new(true));
        let mut orch = Orchestrator::new(
            ScriptedEngine::new(opening(10)),
            approximator(),
            Vec::new(),
            config(&dir, 2, 2),
            flag,
        )
        .unwrap();

        orch.prepare().unwrap();
        assert!(orch.run_batch().unwrap().is_none());
        assert_eq!(orch.engine().searches(), 0);
        assert_eq!(orch.version(), 0);
    }

    #[test]
    fn pool_is_walked_once_per_pass() {
        let dir = TempDir::new().unwrap();
        let positions: Vec<ParsedPosition> = ["e2e4", "d2d4", "c2c4"]
            .iter()
            .map(|mv| ParsedPosition { startpos: true, fen: None, moves: vec![mv.to_string()] })
            .collect();
        let mut orch = Orchestrator::new(
            ScriptedEngine::new(Vec::new()),
            approximator(),
            positions,
            config(&dir, 1, 1),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        for _ in 0..2 {
            let pass: HashSet<String> =
                (0..3).map(|_| orch.next_position().moves[0].clone()).collect();
            assert_eq!(pass.len(), 3);
        }
    }

    #[test]
    fn report_lines_are_json() {
        let dir = TempDir::new().unwrap();
        let report_path = dir.path().join("report.jsonl");
        let cfg = TrainingConfig { report_path: Some(report_path.clone()), ..config(&dir, 1, 2) };
        let mut orch = orchestrator(ScriptedEngine::new(opening(30)), cfg);

        orch.run().unwrap();

        let text = std::fs::read_to_string(&report_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["rows"], 2);
        assert!(value["avg_abs_error"].as_f64().unwrap() > 0.0);
    }
}
