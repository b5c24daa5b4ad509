use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use katyusha_net::{Approximator, NetworkApproximator, OptimizerKind, publish_atomic};

#[derive(Parser, Debug)]
#[command(author, version, about = "Write freshly initialised network weights")]
struct Cli {
    /// 出力先
    #[arg(long)]
    out: PathBuf,

    /// 初期化シード
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> Result<()> {
    katyusha_td::common::logging::init();

    let cli = Cli::parse();
    if let Some(parent) = cli.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let approximator = NetworkApproximator::with_seed(cli.seed, OptimizerKind::Sgd, 0.0);
    publish_atomic(&approximator.snapshot(), &cli.out)
        .with_context(|| format!("failed to write {}", cli.out.display()))?;
    log::info!(
        "wrote {} parameters (seed {}) to {}",
        approximator.network().param_count(),
        cli.seed,
        cli.out.display()
    );
    Ok(())
}
