//! vrouterd - virtual-router forwarding agent.
//!
//! The agent originates routes for the workloads attached to its virtual
//! interfaces and decides, per path, whether to advertise it as preferred.
//! A newly created path starts non-preferred until the dataplane confirms
//! the workload answers at the address; a remote peer asserting a competing
//! path demotes the local one; rapid promote/demote oscillation is damped
//! with per-path exponential backoff.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Configuration (oper)                        │
//! │   interfaces │ allowed-address pairs │ floating IPs │ services  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │ derive + reconcile paths
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Preference Engine                         │
//! │   per-route FIFO shards │ path machines │ backoff timers        │
//! │   dependency fan-out (governing address → mirrored paths)       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │ events
//! ┌─────────────────────────────────────────────────────────────────┐
//! │          Dataplane traffic │ Control-plane peer updates         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Main runtime orchestration
//! - [`core::time`] - Deterministic time utilities
//! - [`core::error`] - Error types
//!
//! ## Preference
//! - [`preference::value`] - Preference attributes and path identity
//! - [`preference::machine`] - Per-path state machine
//! - [`preference::backoff`] - Flap damping with exponential backoff
//! - [`preference::dependency`] - Governing-address fan-out
//! - [`preference::timer`] - Backoff deadline registry
//! - [`preference::engine`] - Serialized event dispatch
//!
//! ## Oper
//! - [`oper::interface`] - Virtual-machine interface model and table
//! - [`oper::route`] - Local path derivation and route read view
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - Events for one route are applied in arrival order, never concurrently
//! - A path's sequence number never decreases while the path exists
//! - An ECMP path is always HIGH and never waits for traffic
//! - Timer expiry is delivered through the owning route's event queue
//! - Sibling paths for the same prefix never perturb each other

// Core infrastructure
pub mod core;

// Path-preference tracking
pub mod preference;

// Operational configuration collaborators
pub mod oper;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime, time};
pub use oper::{interface, route};
pub use preference::{backoff, dependency, engine, machine, value};
