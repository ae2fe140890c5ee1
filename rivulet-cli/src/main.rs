mod cli;
mod config;
mod fetcher;
mod output;
mod player;

use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use rivulet::ChunkFetcher;
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::{Args, Commands};
use crate::config::AppConfig;
use crate::fetcher::{HttpChunkFetcher, SimulatedFetcher};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {:#}", e);
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    let app_config = AppConfig::load(args.config.as_deref())?;
    let scheduler_config = app_config.scheduler_config(args.command.overrides());
    let plan = args.command.plan().clone();
    plan.validate()?;

    info!(
        strategy = %scheduler_config.strategy,
        max_concurrent = scheduler_config.max_concurrent_requests,
        max_retries = scheduler_config.max_retry_attempts,
        timeout_ms = scheduler_config.timeout_ms,
        tracks = plan.tracks.len(),
        chunks = plan.chunks,
        "Starting rivulet"
    );

    let fetcher: Arc<dyn ChunkFetcher> = match &args.command {
        Commands::Simulate {
            latency_ms,
            failure_rate,
            chunk_size,
            ..
        } => Arc::new(SimulatedFetcher::new(
            Duration::from_millis(*latency_ms),
            *failure_rate,
            *chunk_size,
        )),
        Commands::Fetch { url_template, .. } => {
            Arc::new(HttpChunkFetcher::new(url_template.as_str())?)
        }
    };

    player::run_session(scheduler_config, fetcher, &plan).await
}

/// Logs go to stderr so `--json` output on stdout stays machine-readable.
fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    subscriber
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(std::io::stderr),
        )
        .init();
    Ok(())
}
