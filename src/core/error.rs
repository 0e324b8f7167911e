//! Error types for the forwarding agent.
//!
//! Nothing in the preference core is fatal to the process. Events that
//! reference state which no longer exists are dropped silently at the engine
//! boundary; everything else degrades to "path stays LOW", which is the safe
//! default (never advertise an unconfirmed path as preferred).

use std::net::IpAddr;
use thiserror::Error;

use crate::preference::value::{InterfaceId, RouteKey};

/// Common agent error conditions.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Event targets a path that no longer exists.
    ///
    /// Expected under concurrent teardown; callers treat this as a no-op.
    #[error("no path for route {route} owned by the given peer")]
    UnknownPath { route: RouteKey },

    /// Operation references an interface the agent does not know about.
    #[error("unknown interface {interface}")]
    UnknownInterface { interface: InterfaceId },

    /// A service-route tracking IP is not among the interface's configured
    /// addresses (primary IP or allowed-address pair).
    #[error("tracking ip {ip} is not an allowed address of interface {interface}")]
    InvalidTrackingIp { ip: IpAddr, interface: InterfaceId },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The preference engine has shut down and no longer accepts events.
    #[error("preference engine stopped")]
    EngineStopped,
}

impl AgentError {
    /// Create an UnknownPath error.
    pub fn unknown_path(route: RouteKey) -> Self {
        Self::UnknownPath { route }
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Check if this error may be dropped silently (expected races).
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::UnknownPath { .. })
    }
}

/// Result type using AgentError.
pub type AgentResult<T> = Result<T, AgentError>;
