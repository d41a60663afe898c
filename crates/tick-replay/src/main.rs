//! Tick Replay
//!
//! Feeds a JSON-lines file of ticks and manual commands through the position
//! engine against a paper wallet, then prints the trade log and final
//! positions.

mod replay;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use trading_core::config::Config;
use trading_core::types::StrategyKind;
use trading_engine::{PaperGateway, PositionStore, TickDispatcher};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const DEFAULT_FILTER: &str = "tick_replay=info,trading_engine=info,risk_manager=warn";

#[derive(Parser)]
#[command(name = "tick-replay")]
#[command(about = "Replay ticks and manual commands through the trailing-stop engine", long_about = None)]
struct Cli {
    /// JSON-lines file of ticks and commands
    #[arg(short, long)]
    input: PathBuf,

    /// Configuration file; environment variables are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Strategy for positions opened without one (simple, phased)
    #[arg(short, long)]
    strategy: Option<StrategyKind>,

    /// Number of tick workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Let ticks overtake in-flight orders instead of settling each tick
    #[arg(long)]
    pipelined: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env()?,
    };
    if let Some(strategy) = cli.strategy {
        config.engine.default_strategy = strategy;
    }
    if let Some(workers) = cli.workers {
        config.engine.workers = workers;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(&cli)?;
    info!(
        input = %cli.input.display(),
        strategy = %config.engine.default_strategy,
        workers = config.engine.workers,
        step = %config.risk.step,
        "Starting tick replay"
    );

    let gateway = Arc::new(PaperGateway::from_config(&config.paper));
    let store = PositionStore::new(&config, gateway.clone())?;
    let dispatcher = TickDispatcher::from_config(store, &config.engine);

    let mut replayer = replay::Replayer::new(dispatcher);
    if cli.pipelined {
        replayer = replayer.pipelined();
    }

    let file = File::open(&cli.input)
        .await
        .with_context(|| format!("opening {}", cli.input.display()))?;
    let summary = replayer.run(BufReader::new(file)).await?;
    let store = replayer.finish().await;

    let events = store.trade_log().history();
    let positions = store.snapshot().await;
    {
        let mut out = std::io::stdout().lock();
        for event in &events {
            writeln!(out, "{}", serde_json::to_string(event)?)?;
        }
        writeln!(out, "{}", serde_json::to_string_pretty(&positions)?)?;
    }

    let stats = store.stats();
    info!(
        lines = summary.lines,
        rejected = summary.rejected,
        events = events.len(),
        positions = positions.len(),
        ticks_processed = stats.ticks_processed,
        ticks_ignored = stats.ticks_ignored,
        duplicate_triggers = stats.duplicate_triggers,
        cooldowns = stats.cooldowns_engaged,
        balance = %gateway.balance().await,
        "Replay complete"
    );

    Ok(())
}
