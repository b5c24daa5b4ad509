use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use katyusha_net::{Approximator, NetworkApproximator};

use katyusha_td::selfplay::{EngineProcess, SearchLimit, load_start_positions};
use katyusha_td::{Orchestrator, TrainingConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "TD(lambda) self-play trainer for UCI engines")]
struct Cli {
    /// 設定ファイル（toml / json）
    #[arg(long)]
    config: Option<PathBuf>,

    /// エンジンバイナリパス
    #[arg(long)]
    engine_path: Option<PathBuf>,

    /// 開始局面ファイル（1行1局面、.gz可）
    #[arg(long)]
    positions: Option<PathBuf>,

    /// 最大バッチ数
    #[arg(long)]
    max_batches: Option<u64>,

    /// 1バッチあたりのエピソード数
    #[arg(long)]
    batch_size: Option<usize>,

    /// 1エピソードの最大手数
    #[arg(long)]
    num_moves: Option<usize>,

    #[arg(long)]
    lambda: Option<f64>,

    /// 1手あたりの思考時間(ms)
    #[arg(long, conflicts_with = "depth")]
    movetime: Option<u64>,

    /// 固定深さ探索
    #[arg(long)]
    depth: Option<u32>,

    #[arg(long)]
    seed: Option<u64>,

    /// 最新チェックポイントから再開
    #[arg(long)]
    resume: bool,

    /// バッチごとの JSONL レポート
    #[arg(long)]
    report: Option<PathBuf>,
}

fn build_config(cli: &Cli) -> Result<TrainingConfig> {
    let mut cfg = match &cli.config {
        Some(path) => TrainingConfig::load(path)?,
        None => TrainingConfig::default(),
    };
    if let Some(path) = &cli.engine_path {
        cfg.engine.path = path.clone();
    }
    if let Some(path) = &cli.positions {
        cfg.positions = Some(path.clone());
    }
    if let Some(v) = cli.max_batches {
        cfg.max_batches = v;
    }
    if let Some(v) = cli.batch_size {
        cfg.batch_size = v;
    }
    if let Some(v) = cli.num_moves {
        cfg.num_moves = v;
    }
    if let Some(v) = cli.lambda {
        cfg.lambda = v;
    }
    if let Some(ms) = cli.movetime {
        cfg.search_limit = SearchLimit::MoveTime(ms);
    }
    if let Some(d) = cli.depth {
        cfg.search_limit = SearchLimit::Depth(d);
    }
    if cli.seed.is_some() {
        cfg.seed = cli.seed;
    }
    if cli.resume {
        cfg.resume = true;
    }
    if let Some(path) = &cli.report {
        cfg.report_path = Some(path.clone());
    }
    cfg.validate()?;
    Ok(cfg)
}

fn main() -> Result<()> {
    katyusha_td::common::logging::init();

    let cli = Cli::parse();
    let cfg = build_config(&cli)?;

    let positions = match &cfg.positions {
        Some(path) => load_start_positions(path)?,
        None => Vec::new(),
    };
    log::info!("start positions: {}", positions.len().max(1));

    let mut approximator = NetworkApproximator::with_seed(
        cfg.seed.unwrap_or(0),
        cfg.optimizer,
        cfg.learning_rate,
    );
    let mut start_version = 0;
    let store = katyusha_net::SnapshotStore::new(&cfg.checkpoint_dir, &cfg.weights_path)?;
    let latest = if cfg.resume { store.latest_checkpoint()? } else { None };
    if let Some((version, path)) = latest {
        approximator
            .load(&path)
            .with_context(|| format!("failed to resume from {}", path.display()))?;
        start_version = version;
        log::info!("resumed from {} (v{version})", path.display());
    } else if let Some(path) = &cfg.init_weights {
        approximator
            .load(path)
            .with_context(|| format!("failed to load initial weights {}", path.display()))?;
        log::info!("initial weights: {}", path.display());
    } else if cfg.resume {
        log::warn!("no checkpoint found in {}; starting fresh", cfg.checkpoint_dir.display());
    }

    let engine = EngineProcess::spawn(&cfg.engine, "learner")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown_clone = shutdown.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nShutting down gracefully...");
            shutdown_clone.store(true, Ordering::SeqCst);
        })
        .ok();
    }

    let mut orchestrator = Orchestrator::new(engine, approximator, positions, cfg, shutdown)?
        .with_version(start_version);
    let stats = orchestrator.run()?;

    println!();
    println!("=== Training Complete ===");
    println!("Batches: {} (weights v{})", stats.batches, orchestrator.version());
    println!(
        "Episodes: {} (decode errors {}, empty {}, no features {}, bad start {})",
        stats.episodes,
        stats.skipped_decode,
        stats.empty_episodes,
        stats.no_features,
        stats.skipped_start
    );
    println!(
        "Truncated: terminal {}, hold-last-value {}, timeouts {}",
        stats.terminal, stats.held_last_value, stats.timeouts
    );
    println!("Rows trained: {}", stats.rows_trained);
    println!("=========================");
    Ok(())
}
