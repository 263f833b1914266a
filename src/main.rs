//! Tape-reading confluence engine entry point.
//!
//! Loads configuration, wires the coordinator to its external
//! collaborators, and runs the main loop until stopped or a fatal error.

use std::path::PathBuf;

use clap::Parser;
use tape_confluence_engine::config::EngineConfig;
use tape_confluence_engine::coordinator::Coordinator;
use tape_confluence_engine::domain::{CalculatedGrid, MarketSnapshot, Signal};
use tape_confluence_engine::error::EngineError;
use tape_confluence_engine::provider::{CalculatedGridProvider, MarketProvider};
use tape_confluence_engine::sink::{DisplaySink, JsonlPersistence};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(about = "Tape-reading confluence signal engine")]
struct Cli {
    /// Trading date to replay or run live against, DDMMYYYY.
    #[arg(value_parser = parse_ddmmyyyy)]
    date: chrono::NaiveDate,

    /// Path to a TOML configuration file.
    #[arg(long, default_value = "engine.toml")]
    config: PathBuf,

    /// Directory for the JSONL signal/system log streams.
    #[arg(long, default_value = "data/signals")]
    persistence_dir: PathBuf,
}

fn parse_ddmmyyyy(s: &str) -> Result<chrono::NaiveDate, String> {
    chrono::NaiveDate::parse_from_str(s, "%d%m%Y").map_err(|e| format!("expected DDMMYYYY: {e}"))
}

/// No snapshot source is wired in by default; operators supply a real feed
/// adapter. This placeholder keeps the binary runnable end-to-end for a
/// smoke test against an empty market.
struct IdleProvider;

impl MarketProvider for IdleProvider {
    fn connect(&mut self) -> Result<bool, EngineError> {
        Ok(true)
    }

    fn poll(&mut self) -> Result<Option<MarketSnapshot>, EngineError> {
        std::thread::sleep(std::time::Duration::from_millis(100));
        Ok(None)
    }

    fn close(&mut self) {}
}

struct EmptyGridProvider;

impl CalculatedGridProvider for EmptyGridProvider {
    fn grid_for(&self, _instrument: &str) -> Option<CalculatedGrid> {
        None
    }
}

struct LoggingDisplaySink;

impl DisplaySink for LoggingDisplaySink {
    fn add(&mut self, signal: &Signal) {
        info!(source = ?signal.source, level = ?signal.level, message = %signal.message, "signal");
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tape_confluence_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    info!(date = %cli.date, "starting tape-reading confluence engine");

    let config = match EngineConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let persistence = match JsonlPersistence::new(&cli.persistence_dir) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to initialize persistence directory");
            std::process::exit(1);
        }
    };

    let mut coordinator = Coordinator::new(
        config,
        Box::new(IdleProvider),
        Box::new(EmptyGridProvider),
        Box::new(persistence),
        Box::new(LoggingDisplaySink),
    );

    coordinator.run();
}
