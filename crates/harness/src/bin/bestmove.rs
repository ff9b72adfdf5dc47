use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use perftdiff::config::{EngineDescriptor, PositionSpec};
use perftdiff::uci::EngineAdapter;

/// エンジン1本に1手だけ探索させる動作確認用バイナリ。
///
/// `cargo run -p perftdiff --bin bestmove -- --engine stockfish --moves e2e4`
#[derive(Parser, Debug)]
#[command(author, version, about = "ask one UCI engine for a best move")]
struct Cli {
    /// Engine binary
    #[arg(long)]
    engine: PathBuf,

    /// Extra arguments passed to the engine process
    #[arg(long, num_args = 1..)]
    engine_args: Option<Vec<String>>,

    /// Engine display name used in logs
    #[arg(long, default_value = "engine")]
    name: String,

    /// Root position: "startpos" or a FEN string
    #[arg(long, default_value = "startpos")]
    fen: String,

    /// Moves applied after the root position
    #[arg(long, num_args = 1..)]
    moves: Option<Vec<String>>,

    /// go movetime value in milliseconds
    #[arg(long, default_value_t = 100)]
    movetime_ms: u64,

    /// Overall deadline for the search in milliseconds
    #[arg(long, default_value_t = 10_000)]
    deadline_ms: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let mut desc = EngineDescriptor::new(&cli.name, &cli.engine);
    if let Some(args) = &cli.engine_args {
        desc.args = args.clone();
    }

    // Ctrl-C で探索を中断できるようにする
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.store(true, Ordering::Relaxed))
            .context("failed to install Ctrl-C handler")?;
    }

    let mut pos = PositionSpec::parse(&cli.fen)?;
    if let Some(moves) = &cli.moves {
        pos.moves = moves.clone();
    }

    let mut engine = EngineAdapter::spawn(&desc)?;
    engine.set_position(&pos)?;

    let started = Instant::now();
    let mv = engine.search_best_move(
        cli.movetime_ms,
        Duration::from_millis(cli.deadline_ms),
        &cancel,
    )?;
    println!("bestmove {mv} ({}ms)", started.elapsed().as_millis());
    Ok(())
}
