use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use perftdiff::config::{EngineDescriptor, PositionSpec};
use perftdiff::perft::collect_with_timeout;
use serde::Deserialize;

/// 既知の perft 総数スイートを1エンジンに対して検証する。
///
/// `cargo run -p perftdiff --bin movegen_check -- \
///   --cases crates/harness/testdata/movegen_cases.json --engine stockfish`
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "run a perft node-count suite against one engine"
)]
struct Cli {
    /// JSON file: [{"fen": ..., "depth": N, "nodes": N}, ...]
    #[arg(long)]
    cases: PathBuf,

    /// Engine binary
    #[arg(long)]
    engine: PathBuf,

    /// Engine display name used in errors
    #[arg(long, default_value = "engine")]
    name: String,

    /// Perft command template ({fen}, {moves}, {depth})
    #[arg(long)]
    template: Option<String>,

    /// Per-case timeout in seconds
    #[arg(long, default_value_t = 600)]
    collect_timeout_s: u64,
}

#[derive(Deserialize)]
struct PerftCase {
    fen: String,
    depth: u32,
    nodes: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let text = std::fs::read_to_string(&cli.cases)
        .with_context(|| format!("failed to read {}", cli.cases.display()))?;
    let cases: Vec<PerftCase> = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", cli.cases.display()))?;
    if cases.is_empty() {
        bail!("{}: no cases found", cli.cases.display());
    }

    let mut desc = EngineDescriptor::new(&cli.name, &cli.engine);
    if let Some(template) = &cli.template {
        desc.template = template.clone();
    }
    let timeout = Duration::from_secs(cli.collect_timeout_s);

    let mut failures = 0u32;
    for case in &cases {
        let pos = PositionSpec::from_fen(&case.fen);
        let result = collect_with_timeout(&desc, &pos, case.depth, timeout)
            .with_context(|| format!("perft failed for {} depth {}", case.fen, case.depth))?;
        let total = result.total();
        let ok = total == case.nodes;
        if !ok {
            failures += 1;
        }
        println!(
            "{} : {} depth {} -> {} nodes (expected {})",
            if ok { "OK" } else { "FAILED" },
            case.fen,
            case.depth,
            total,
            case.nodes
        );
    }

    if failures > 0 {
        bail!("{failures}/{} cases failed", cases.len());
    }
    println!("all {} cases passed", cases.len());
    Ok(())
}
