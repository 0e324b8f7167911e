//! Route path-preference tracking.
//!
//! Decides, per locally-originated route path, whether the agent advertises
//! it as preferred (HIGH) or non-preferred (LOW): a path starts LOW until
//! the dataplane confirms the workload actually answers at its address, is
//! demoted when a remote peer asserts a competing path, and is flap-damped
//! with exponential backoff when promotion and demotion alternate rapidly.

pub mod backoff;
pub mod dependency;
pub mod engine;
pub mod machine;
pub mod timer;
pub mod value;

pub use backoff::BackoffConfig;
pub use dependency::GoverningAddress;
pub use engine::PreferenceEngine;
pub use value::{PathId, PreferenceValue, RouteKey, HIGH, LOW};
