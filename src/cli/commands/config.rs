//! Config command implementation.

use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::core::config::Config;

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate configuration file.
    Validate {
        /// Config file path.
        #[arg(short, long, default_value = "config/vrouterd.toml")]
        config: PathBuf,
    },
    /// Print configuration with defaults applied.
    Show {
        /// Config file path.
        #[arg(short, long, default_value = "config/vrouterd.toml")]
        config: PathBuf,
    },
    /// Generate a configuration template.
    Generate {
        /// Output file path.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { config } => validate_config(&config),
        ConfigCommand::Show { config } => show_config(&config),
        ConfigCommand::Generate { output } => generate_config(output.as_deref()),
    }
}

fn validate_config(path: &PathBuf) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {:?}", path);
    }
    Config::from_file(path)?;
    println!("✓ Configuration is valid");
    Ok(())
}

fn show_config(path: &PathBuf) -> Result<()> {
    let config = Config::from_file(path)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn generate_config(output: Option<&std::path::Path>) -> Result<()> {
    let template = generate_template();
    match output {
        Some(path) => {
            std::fs::write(path, &template)?;
            println!("Generated config template: {:?}", path);
        }
        None => {
            println!("{}", template);
        }
    }
    Ok(())
}

fn generate_template() -> String {
    r#"# vrouterd configuration

[agent]
name = "vrouterd"
tick_period_ms = 100

[preference]
workers = 4
base_interval_ms = 100
max_interval_ms = 3200
max_flap_count = 4

[telemetry]
log_level = "info"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_and_validates() {
        let template = generate_template();
        assert!(template.contains("[preference]"));
        Config::from_toml(&template).unwrap();
    }
}
