//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// silo - declarative object-storage reconciliation
#[derive(Parser, Debug)]
#[command(name = "silo")]
#[command(version)]
#[command(about = "Drive buckets, users, policies and service accounts toward declared state")]
#[command(
    long_about = "silo reconciles declared object-storage resources against a control plane: it creates what is missing, corrects drift, and removes what it owns when a declaration is deleted."
)]
pub struct Cli {
    /// Log filter (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile a manifest until interrupted
    Run {
        /// Configuration file
        #[arg(short, long, env = "SILO_CONFIG", default_value = "silo.toml")]
        config: PathBuf,

        /// Resource manifest (YAML)
        #[arg(short, long)]
        manifest: PathBuf,
    },

    /// Show what a pass would do for each resource, without changing anything
    Plan {
        /// Configuration file
        #[arg(short, long, env = "SILO_CONFIG", default_value = "silo.toml")]
        config: PathBuf,

        /// Resource manifest (YAML)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Print one JSON object per resource
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Validate configuration and print resolved profiles
    Check {
        /// Configuration file
        #[arg(short, long, env = "SILO_CONFIG", default_value = "silo.toml")]
        config: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "silo",
            "run",
            "--config",
            "prod.toml",
            "--manifest",
            "resources.yaml",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "info");
        assert!(matches!(
            cli.command,
            Commands::Run { config, manifest }
                if config == PathBuf::from("prod.toml") && manifest == PathBuf::from("resources.yaml")
        ));
    }

    #[test]
    fn test_parse_plan_with_global_log_level() {
        let cli = Cli::try_parse_from([
            "silo",
            "plan",
            "-m",
            "resources.yaml",
            "--json",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::Plan { json: true, .. }));
    }

    #[test]
    fn test_run_requires_manifest() {
        assert!(Cli::try_parse_from(["silo", "run"]).is_err());
    }
}
