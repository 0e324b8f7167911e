//! Configuration parsing and validation.
//!
//! Agent configuration is loaded from TOML files with CLI overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::preference::backoff::BackoffConfig;

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Agent identity and tick settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Preference engine settings.
    #[serde(default)]
    pub preference: PreferenceConfig,

    /// Telemetry and observability configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            preference: PreferenceConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Agent identity and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent name, used in logs.
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Timer tick period in milliseconds (backoff deadline granularity).
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            tick_period_ms: default_tick_period_ms(),
        }
    }
}

/// Preference engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceConfig {
    /// Number of shard worker tasks.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Flap backoff floor in milliseconds.
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,

    /// Flap backoff ceiling in milliseconds.
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Consecutive flaps after which confirmation is suppressed.
    #[serde(default = "default_max_flap_count")]
    pub max_flap_count: u32,
}

impl Default for PreferenceConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            base_interval_ms: default_base_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            max_flap_count: default_max_flap_count(),
        }
    }
}

impl PreferenceConfig {
    /// Backoff tunables for the engine.
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base_interval_ms: self.base_interval_ms,
            max_interval_ms: self.max_interval_ms,
            max_flap_count: self.max_flap_count,
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_agent_name() -> String {
    "vrouterd".to_string()
}

fn default_tick_period_ms() -> u64 {
    100
}

fn default_workers() -> usize {
    4
}

fn default_base_interval_ms() -> u64 {
    100
}

fn default_max_interval_ms() -> u64 {
    3_200
}

fn default_max_flap_count() -> u32 {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(workers) = overrides.workers {
            self.preference.workers = workers;
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        if self.agent.tick_period_ms == 0 {
            anyhow::bail!("agent.tick_period_ms must be > 0");
        }
        if self.preference.workers == 0 {
            anyhow::bail!("preference.workers must be > 0");
        }
        if self.preference.base_interval_ms == 0 {
            anyhow::bail!("preference.base_interval_ms must be > 0");
        }
        if self.preference.max_interval_ms < self.preference.base_interval_ms {
            anyhow::bail!(
                "preference.max_interval_ms ({}) cannot be below base_interval_ms ({})",
                self.preference.max_interval_ms,
                self.preference.base_interval_ms
            );
        }
        if self.preference.max_flap_count == 0 {
            anyhow::bail!("preference.max_flap_count must be > 0");
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override shard worker count.
    pub workers: Option<usize>,
}
