//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

use std::io::Write;
use std::net::IpAddr;
use tempfile::NamedTempFile;
use vrouterd::core::config::Config;
use vrouterd::oper::interface::VmInterface;
use vrouterd::preference::backoff::BackoffConfig;
use vrouterd::preference::engine::PreferenceEngine;
use vrouterd::preference::value::{InterfaceId, MacAddress, VrfId};

/// Create a minimal valid configuration file.
pub fn create_minimal_config() -> NamedTempFile {
    let config_content = r#"
[agent]
name = "vrouterd-test"

[preference]
workers = 2
"#;

    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(config_content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Create a configuration with custom settings.
pub fn create_config_with_settings(workers: usize, log_level: &str) -> NamedTempFile {
    let config_content = format!(
        r#"
[agent]
name = "vrouterd-test"

[preference]
workers = {}

[telemetry]
log_level = "{}"
"#,
        workers, log_level
    );

    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(config_content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Load a config from a temp file.
pub fn load_config(file: &NamedTempFile) -> Config {
    Config::from_file(file.path()).expect("Failed to load config")
}

/// Spawn an engine with default backoff tunables and two shards.
pub fn test_engine() -> PreferenceEngine {
    PreferenceEngine::new(2, BackoffConfig::default())
}

/// Parse an IP address literal.
pub fn ip(s: &str) -> IpAddr {
    s.parse().expect("bad ip literal")
}

/// Parse a MAC address literal.
pub fn mac(s: &str) -> MacAddress {
    s.parse().expect("bad mac literal")
}

/// A bare interface with a primary IP and nothing else configured.
pub fn base_interface(id: u32, vrf: u32, primary_ip: &str, mac_str: &str) -> VmInterface {
    VmInterface {
        id: InterfaceId(id),
        vrf: VrfId(vrf),
        mac: mac(mac_str),
        primary_ip: ip(primary_ip),
        allowed_address_pairs: Vec::new(),
        floating_ips: Vec::new(),
        service_ips: Vec::new(),
        static_routes: Vec::new(),
        static_preference: 0,
        security_groups: Vec::new(),
        active: true,
    }
}
