//! ewwm-handpose - hand pose recognition over stdio IPC.
//!
//! Part of the EXWM-VR project: reads hand frames as s-expressions and
//! answers pose queries for Emacs.

use std::io;

use anyhow::{anyhow, Context};
use clap::Parser;
use tracing::info;

use ewwm_handpose::ipc::{serve, ServerOptions};
use ewwm_handpose::pose::{PoseEngine, SearchMethod};

#[derive(Parser, Debug)]
#[command(name = "ewwm-handpose", about = "EXWM-VR hand pose recognizer")]
struct Cli {
    /// Search time budget per hand per tick, in milliseconds
    #[arg(long, default_value_t = 6.0)]
    budget_ms: f64,

    /// Scoring method: joint-positions or digit-tips
    #[arg(long, default_value = "joint-positions")]
    method: String,

    /// Run an engine update after every hand-frame message
    #[arg(long)]
    auto_tick: bool,

    /// Log all IPC messages to stderr
    #[arg(long)]
    ipc_trace: bool,

    /// Show version and exit
    #[arg(long)]
    version: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("ewwm-handpose {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // stdout carries protocol output only
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ewwm_handpose=info".into()),
        )
        .init();

    info!("ewwm-handpose v{} starting", env!("CARGO_PKG_VERSION"));

    let mut engine = PoseEngine::new();
    if !engine.config.set_search_budget_ms(cli.budget_ms) {
        return Err(anyhow!("--budget-ms must be a positive number, got {}", cli.budget_ms));
    }
    engine.config.search_method = SearchMethod::parse(&cli.method)
        .ok_or_else(|| anyhow!("unknown --method {:?}; use joint-positions or digit-tips", cli.method))?;
    info!("config: {}", engine.config.status_sexp());

    let opts = ServerOptions {
        trace: cli.ipc_trace,
        auto_tick: cli.auto_tick,
    };
    let stdin = io::stdin();
    let handled = serve(&mut engine, stdin.lock(), io::stdout().lock(), opts)
        .context("IPC stream failed")?;

    info!(messages = handled, hands = engine.hand_count(), "input closed, shutting down");
    Ok(())
}
