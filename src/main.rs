//! # graphsync
//!
//! Runs provider instances on their own schedules and reconciles what they
//! discover into the graph through the apply gateway.
//!
//! ## Startup
//!
//! 1. **Tracing** - `RUST_LOG` filter (default `info`), pretty or JSON output
//! 2. **Configuration** - YAML file plus `GRAPHSYNC_` environment overrides
//! 3. **Registry** - the compiled-in provider table
//! 4. **Scheduler** - one slot per instance, started by `run` or ticked once by `once`
//!
//! ## Shutdown
//!
//! Ctrl+C signals every slot; in-flight ticks are cancelled without
//! applying, so each instance's snapshot stays at its last successful tick.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Run { config } => commands::run(&config).await,
        Commands::Once { config } => commands::once(&config).await,
        Commands::Providers { json } => commands::providers(json),
        Commands::Validate { config } => commands::validate(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}
