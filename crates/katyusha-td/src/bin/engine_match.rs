use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use katyusha_td::selfplay::{
    EngineConfig, EngineProcess, GameConfig, GameOutcome, ParsedPosition, SearchEngine,
    SearchLimit, describe_position, load_start_positions, run_game,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Play a match between two UCI engines")]
struct Cli {
    /// エンジン1の設定（JSON）
    engine1: PathBuf,

    /// エンジン2の設定（JSON）
    engine2: PathBuf,

    /// 対局数
    #[arg(long, default_value_t = 10)]
    games: u32,

    /// 1手あたりの思考時間(ms)
    #[arg(long, default_value_t = 100)]
    movetime: u64,

    /// 1局あたり最大手数
    #[arg(long, default_value_t = 300)]
    max_plies: u32,

    /// 開始局面ファイル（未指定時は平手）
    #[arg(long)]
    positions: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,
}

fn load_descriptor(path: &Path) -> Result<EngineConfig> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

fn start_engine(cfg: &EngineConfig, label: &str) -> Result<EngineProcess> {
    let mut engine = EngineProcess::spawn(cfg, label)?;
    engine.initialize()?;
    if let Some(desc) = &cfg.description {
        log::info!("{label}: {desc}");
    }
    Ok(engine)
}

#[derive(Default)]
struct Tally {
    wins: u32,
    draws: u32,
    losses: u32,
}

impl Tally {
    fn total(&self) -> u32 {
        self.wins + self.draws + self.losses
    }

    fn score(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (f64::from(self.wins) + 0.5 * f64::from(self.draws)) / f64::from(total)
    }
}

fn main() -> Result<()> {
    katyusha_td::common::logging::init();

    let cli = Cli::parse();
    if cli.games == 0 {
        bail!("--games must be >= 1");
    }

    let cfg1 = load_descriptor(&cli.engine1)?;
    let cfg2 = load_descriptor(&cli.engine2)?;
    let positions = match &cli.positions {
        Some(path) => load_start_positions(path)?,
        None => vec![ParsedPosition::startpos()],
    };
    if positions.is_empty() {
        bail!("no start positions loaded");
    }

    let mut engine1 = start_engine(&cfg1, "engine1")?;
    let mut engine2 = start_engine(&cfg2, "engine2")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown_clone = shutdown.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nShutting down gracefully...");
            shutdown_clone.store(true, Ordering::SeqCst);
        })
        .ok();
    }

    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed.unwrap_or_else(rand::random));
    let game_cfg = GameConfig { max_plies: cli.max_plies, limit: SearchLimit::MoveTime(cli.movetime) };
    let mut tally = Tally::default();

    for game_no in 1..=cli.games {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let start = &positions[rng.random_range(0..positions.len())];
        let engine1_white = rng.random_bool(0.5);
        let result = if engine1_white {
            run_game(&mut engine1, &mut engine2, start, &game_cfg)?
        } else {
            run_game(&mut engine2, &mut engine1, start, &game_cfg)?
        };

        let engine1_won = match result.outcome {
            GameOutcome::Draw => None,
            GameOutcome::WhiteWin => Some(engine1_white),
            GameOutcome::BlackWin => Some(!engine1_white),
        };
        match engine1_won {
            Some(true) => tally.wins += 1,
            Some(false) => tally.losses += 1,
            None => tally.draws += 1,
        }
        println!(
            "game {game_no}: engine1 {} {} ({}, {} plies) from {}",
            if engine1_white { "white" } else { "black" },
            result.outcome.label(),
            result.reason,
            result.plies,
            describe_position(start)
        );
    }

    for engine in [&mut engine1, &mut engine2] {
        if let Err(e) = engine.shutdown() {
            log::warn!("[{}] shutdown failed: {e:#}", engine.label);
        }
    }

    println!();
    println!("=== Match Complete ===");
    println!(
        "engine1 vs engine2: +{} ={} -{} ({} games, score {:.3})",
        tally.wins,
        tally.draws,
        tally.losses,
        tally.total(),
        tally.score()
    );
    println!("======================");
    Ok(())
}
