//! Command-line interface.
//!
//! Unified CLI for agent operations.

pub mod commands;

use clap::{Parser, Subcommand};

/// vrouterd - virtual-router forwarding agent.
#[derive(Parser, Debug)]
#[command(name = "vrouterd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the agent.
    Start(commands::StartArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
}
