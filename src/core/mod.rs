//! Core runtime infrastructure.
//!
//! This module contains the essential components for running the agent:
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Main runtime orchestration
//! - [`time`] - Deterministic time utilities
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod runtime;
pub mod time;
