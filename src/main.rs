//! vrouterd - unified CLI entrypoint.
//!
//! Usage:
//!   vrouterd start --config config/vrouterd.toml
//!   vrouterd config validate --config config/vrouterd.toml
//!   vrouterd config generate

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use vrouterd::cli::commands::{run_config, run_start_with_config};
use vrouterd::cli::{Cli, Commands};
use vrouterd::config::ConfigOverrides;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/vrouterd.toml"));

    let overrides = ConfigOverrides {
        log_level: cli.log_level,
        workers: None,
    };

    match cli.command {
        Commands::Start(_args) => run_start_with_config(&config_path, &overrides).await,
        Commands::Config(args) => run_config(args),
    }
}
