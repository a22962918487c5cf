//! # silo
//!
//! Entry point for the `silo` binary.
//!
//! ## Commands
//!
//! - `run` loads a manifest and reconciles it until Ctrl+C
//! - `plan` reports what a pass would do for each resource
//! - `check` validates configuration and prints resolved profiles
//!
//! ## Logging
//!
//! `RUST_LOG` takes precedence over `--log-level`.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use silo::cli::Cli;
use silo::commands::execute_command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    execute_command(cli.command).await
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
