use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use katyusha_net::{Approximator, NetworkApproximator, OptimizerKind, TOTAL_FEATURES, publish_atomic};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use katyusha_td::bootstrap::{self, BootstrapConfig};
use katyusha_td::common::io::JsonlWriter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Warm-start network weights from logged engine evaluations")]
struct Cli {
    /// 評価値ファイル（1行1局、.gz可）
    #[arg(long)]
    evals: PathBuf,

    /// 特徴量ファイル（1局につき評価値の個数+1行、.gz可）
    #[arg(long)]
    features: PathBuf,

    /// 学習後の重みの出力先
    #[arg(long)]
    out: PathBuf,

    #[arg(long, default_value_t = 50)]
    epochs: usize,

    /// 末尾から検証に回す割合
    #[arg(long, default_value_t = 0.25)]
    validation_split: f64,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    #[arg(long, value_parser = ["sgd", "adagrad"], default_value = "adagrad")]
    optimizer: String,

    #[arg(long, default_value_t = 0.01)]
    learning_rate: f32,

    /// 読み込む最大局数
    #[arg(long)]
    max_games: Option<usize>,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// エポックごとの JSONL レポート
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    katyusha_td::common::logging::init();

    let cli = Cli::parse();
    let cfg = BootstrapConfig {
        epochs: cli.epochs,
        batch_size: cli.batch_size,
        validation_split: cli.validation_split,
        ..Default::default()
    };
    cfg.validate()?;
    let kind = match cli.optimizer.as_str() {
        "sgd" => OptimizerKind::Sgd,
        _ => OptimizerKind::Adagrad,
    };

    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
    let samples =
        bootstrap::load_samples(&cli.evals, &cli.features, TOTAL_FEATURES, cli.max_games, &mut rng)?;
    let (mut train_set, validation) = bootstrap::split_validation(samples, cfg.validation_split);

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    let mut approximator = NetworkApproximator::with_seed(cli.seed, kind, cli.learning_rate);
    let reports = bootstrap::train(
        &mut approximator,
        &mut train_set,
        &validation,
        &cfg,
        &mut rng,
        &interrupted,
    )?;

    if let Some(path) = &cli.report {
        let mut writer =
            JsonlWriter::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        for report in &reports {
            writer.write_record(report)?;
        }
        writer.close()?;
    }

    if let Some(parent) = cli.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    publish_atomic(&approximator.snapshot(), &cli.out)
        .with_context(|| format!("failed to write {}", cli.out.display()))?;

    println!("epochs:      {}", reports.len());
    if let Some(last) = reports.last() {
        println!("train loss:  {:.6}", last.train_loss);
        if let Some(val) = last.validation_loss {
            println!("val loss:    {val:.6}");
        }
    }
    println!("weights:     {}", cli.out.display());
    Ok(())
}
