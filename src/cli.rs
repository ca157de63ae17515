//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Migrator - ordered, exclusive, resumable migrations
#[derive(Parser, Debug)]
#[command(name = "migrator")]
#[command(version)]
#[command(about = "Run ordered migrations under an exclusive, heartbeated lock")]
#[command(
    long_about = "Migrator bootstraps its lock and status tables, takes a run-exclusivity lock, reconciles declared migrations with persisted history and runs what is left in order. These commands inspect configuration and exercise the orchestrator against an in-memory store."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a config file and print the effective configuration
    Check {
        /// TOML config file; MIGRATOR_* environment variables override it
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run no-op migrations against an in-memory store and print the result
    Simulate {
        /// TOML config file; MIGRATOR_* environment variables override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of migrations to register, ordered 1..=N
        #[arg(short, long, default_value_t = 3)]
        migrations: i64,

        /// Order that fails on its first attempt
        #[arg(short, long)]
        fail: Option<i64>,

        /// Orders to register as disabled
        #[arg(short, long)]
        disable: Vec<i64>,

        /// How many times to run the migrator
        #[arg(short, long, default_value_t = 1)]
        runs: usize,
    },
}
