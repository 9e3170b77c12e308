use std::io::{self, BufRead};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use salmon_uci::{Board, EngineOptions, EvaluatorKind, MoveGenerator, UciHandler};

#[derive(Parser)]
#[command(name = "salmon-uci")]
#[command(about = "UCI chess engine", long_about = None)]
#[command(version)]
struct Args {
    /// Transposition table size in MB
    #[arg(long, default_value_t = 16)]
    hash: usize,

    /// Search threads
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Static evaluator (classical or material)
    #[arg(long, default_value_t = EvaluatorKind::Classical)]
    evaluator: EvaluatorKind,

    /// Log filter, e.g. `debug` or `salmon_uci::search=trace`. Overrides RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Count legal move tree leaves, per root move
    Perft {
        depth: u32,

        /// Position to count from; the start position by default
        #[arg(long)]
        fen: Option<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref())?;

    if let Some(Command::Perft { depth, fen }) = args.command {
        return perft(depth, fen.as_deref());
    }

    let options = EngineOptions {
        hash_mb: args.hash,
        threads: args.threads,
        evaluator: args.evaluator,
        ..EngineOptions::default()
    };
    tracing::info!(?options, "starting engine");

    let (lines_tx, lines_rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if lines_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::error!(%err, "failed to read stdin");
                        break;
                    }
                }
            }
        })
        .context("spawning stdin reader")?;

    UciHandler::new(io::stdout().lock(), options)
        .run(lines_rx)
        .context("engine stopped abnormally")
}

// Logs go to stderr; stdout belongs to the protocol.
fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
    Ok(())
}

fn perft(depth: u32, fen: Option<&str>) -> Result<()> {
    let mut board = match fen {
        Some(fen) => Board::from_fen(fen).context("invalid --fen")?,
        None => Board::new(),
    };

    let started = Instant::now();
    let divide = MoveGenerator::new().divide(&mut board, depth.max(1));
    let total: u64 = divide.iter().map(|(_, nodes)| nodes).sum();
    for (mv, nodes) in &divide {
        println!("{mv}: {nodes}");
    }

    let elapsed = started.elapsed();
    println!();
    println!("Nodes searched: {total}");
    println!(
        "Time: {} ms ({:.0} nps)",
        elapsed.as_millis(),
        total as f64 / elapsed.as_secs_f64().max(1e-9)
    );
    Ok(())
}
