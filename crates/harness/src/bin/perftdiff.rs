use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::Parser;
use perftdiff::bisect::{DivergenceReport, MoveDiff, ProcessSource, RoundEvent, sweep};
use perftdiff::config::{
    DEFAULT_ROOT_FEN, EngineDescriptor, HarnessConfig, PositionSpec, load_config,
};
use perftdiff::report::{RunLog, default_log_path};

/// 2つの UCI エンジンの perft 集計を突き合わせ、食い違いの最小手順を特定する。
///
/// # よく使うコマンド例
///
/// - 設定ファイルで candidate / reference を指定して深さ6まで:
///   `cargo run -p perftdiff --bin perftdiff -- --engines engines.toml`
///
/// - コマンドラインだけで指定(テンプレート省略時は `go perft` 形式):
///   `cargo run -p perftdiff --bin perftdiff -- --candidate ./bin/myfish \
///     --candidate-template 'position fen {fen} moves {moves}\nperft {depth}' \
///     --reference stockfish --max-depth 5`
///
/// 食い違い(欠落手を含む)が見つかると終了コード 1 で終わる。
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "differential perft harness (candidate vs reference)"
)]
struct Cli {
    /// TOML config with two [[engines]] entries (candidate first)
    #[arg(long)]
    engines: Option<PathBuf>,

    /// Candidate engine binary (alternative to --engines)
    #[arg(long)]
    candidate: Option<PathBuf>,

    /// Reference engine binary (alternative to --engines)
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Perft command template for the candidate ({fen}, {moves}, {depth})
    #[arg(long)]
    candidate_template: Option<String>,

    /// Perft command template for the reference
    #[arg(long)]
    reference_template: Option<String>,

    /// Root position: "startpos" or a FEN string
    #[arg(long)]
    fen: Option<String>,

    /// Moves applied to the root position before comparing
    #[arg(long, num_args = 1..)]
    moves: Option<Vec<String>>,

    /// Maximum sweep depth (overrides the config file)
    #[arg(long)]
    max_depth: Option<u32>,

    /// Per-collection timeout in seconds
    #[arg(long, default_value_t = 600)]
    collect_timeout_s: u64,

    /// Output path for the JSONL run log
    /// (defaults to runs/perftdiff/<timestamp>-diff.jsonl)
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let cfg = build_config(&cli)?;

    let timestamp = Local::now();
    let log_path = cli.out.clone().unwrap_or_else(|| default_log_path(&timestamp));
    let mut run_log = RunLog::create(&log_path)?;
    run_log.meta(&cfg, &timestamp)?;

    println!("candidate: {} ({})", cfg.candidate.name, cfg.candidate.path.display());
    println!("reference: {} ({})", cfg.reference.name, cfg.reference.path.display());
    println!("root: {}", cfg.root.command());
    println!();

    let timeout = Duration::from_secs(cli.collect_timeout_s);
    let candidate = ProcessSource::new(&cfg.candidate, timeout);
    let reference = ProcessSource::new(&cfg.reference, timeout);

    let outcome = {
        let mut on_round = |ev: &RoundEvent<'_>| {
            let _ = run_log.round(ev);
            if let MoveDiff::Counts { mv, lhs, rhs } = ev.diff {
                println!(
                    "  depth {} [{}]: {} differs ({}: {}, {}: {})",
                    ev.depth,
                    ev.moves.join(" "),
                    mv,
                    cfg.candidate.name,
                    lhs,
                    cfg.reference.name,
                    rhs
                );
            }
        };
        let mut on_depth = |depth: u32, report: &DivergenceReport| match report {
            DivergenceReport::Consistent { .. } => println!("perft {depth}: OK - same results"),
            DivergenceReport::Diverged(_) => println!("perft {depth}: divergence confirmed"),
        };
        sweep(
            &candidate,
            &reference,
            &cfg.root,
            cfg.max_depth,
            &mut on_round,
            &mut on_depth,
        )
    };

    let report = match outcome {
        Ok(report) => report,
        Err(err) => {
            // 欠落手やプロトコル違反は witness なしで即座に失敗になる
            run_log.flush()?;
            return Err(err).context("comparison aborted");
        }
    };
    run_log.outcome(&report)?;
    run_log.flush()?;

    println!();
    match &report {
        DivergenceReport::Consistent { depth } => {
            println!("engines agree through depth {depth}");
            println!("run log written to {}", run_log.path().display());
            Ok(())
        }
        DivergenceReport::Diverged(witness) => {
            println!("=== Divergence Witness ===");
            println!("moves: {}", witness.moves.join(" "));
            println!("depth: {}", witness.depth);
            println!(
                "{}: {} nodes | {}: {} nodes",
                cfg.candidate.name, witness.counts.0, cfg.reference.name, witness.counts.1
            );
            println!("==========================");
            println!("run log written to {}", run_log.path().display());
            std::process::exit(1);
        }
    }
}

fn build_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut cfg = match &cli.engines {
        Some(path) => load_config(path)?,
        None => {
            let (Some(candidate), Some(reference)) = (&cli.candidate, &cli.reference) else {
                bail!("specify --engines <toml>, or both --candidate and --reference");
            };
            HarnessConfig {
                root: PositionSpec::from_fen(DEFAULT_ROOT_FEN),
                candidate: descriptor("candidate", candidate, &cli.candidate_template),
                reference: descriptor("reference", reference, &cli.reference_template),
                max_depth: 6,
            }
        }
    };
    if let Some(fen) = &cli.fen {
        cfg.root = PositionSpec::parse(fen)?;
    }
    if let Some(moves) = &cli.moves {
        cfg.root.moves = moves.clone();
    }
    if let Some(template) = &cli.candidate_template {
        cfg.candidate.template = template.clone();
    }
    if let Some(template) = &cli.reference_template {
        cfg.reference.template = template.clone();
    }
    if let Some(depth) = cli.max_depth {
        cfg.max_depth = depth;
    }
    Ok(cfg)
}

fn descriptor(name: &str, path: &Path, template: &Option<String>) -> EngineDescriptor {
    let mut desc = EngineDescriptor::new(name, path);
    if let Some(template) = template {
        desc.template = template.clone();
    }
    desc
}
