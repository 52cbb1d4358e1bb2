//! SocioLens web server
//!
//! # Architecture
//! - **inference**: device detection, classifier backends, worker pool
//! - **captions**: caption scraping and rewriting collaborators
//! - **core**: input validation and time formatting
//! - **infrastructure**: HTTP API, timing, metrics, health, config, logging
//! - **engine**: startup and shutdown orchestration

use anyhow::Context;
use clap::Parser;
use sociolens::engine::AppEngine;
use sociolens::infrastructure::config::Config;
use sociolens::infrastructure::logging::init_logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sociolens")]
#[command(about = "SocioLens Web Server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Number of GPUs to use (default: all detected, 1 without CUDA)
    #[arg(short = 'n', long = "num-gpus", value_name = "N")]
    num_gpus: Option<usize>,

    /// Port to run the server on
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind the server to
    #[arg(long)]
    host: Option<String>,

    /// Configuration file path (default: $CONFIG_PATH or config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::load().context("loading configuration")?,
    };
    config.apply_overrides(cli.host, cli.port, cli.num_gpus);
    config.validate().context("invalid command line overrides")?;

    // Guards flush file appenders on drop
    let _log_guards = init_logging(&config.logging).context("initializing logging")?;

    tracing::info!("Starting web server on {}", config.bind_address());

    let engine = AppEngine::build(config).context("starting SocioLens")?;
    engine.run().await?;

    Ok(())
}
