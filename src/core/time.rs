//! Deterministic time utilities.
//!
//! All backoff deadlines in the preference engine are expressed as ticks.
//! Production code derives ticks from the wall clock through a [`TickSource`];
//! tests pass synthetic ticks to the engine's `advance_clock` so timer
//! behavior is deterministic without sleeping.

use serde::{Deserialize, Serialize};

/// A monotonic tick in milliseconds.
///
/// Ticks are the sole source of time for flap-backoff deadline evaluation.
/// A timer never fires by sampling the wall clock inside event application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tick {
    /// Milliseconds since an epoch (implementation-defined).
    pub ms: u64,
}

impl Tick {
    /// Create a new tick with the given millisecond value.
    pub const fn new(ms: u64) -> Self {
        Self { ms }
    }

    /// Create a tick representing zero (epoch start).
    pub const fn zero() -> Self {
        Self { ms: 0 }
    }

    /// Add milliseconds to this tick.
    pub const fn add_ms(self, ms: u64) -> Self {
        Self { ms: self.ms + ms }
    }

    /// Check if this tick is at or after the given deadline.
    pub const fn is_at_or_after(self, deadline: Tick) -> bool {
        self.ms >= deadline.ms
    }

    /// Check if this tick is before the given deadline.
    pub const fn is_before(self, deadline: Tick) -> bool {
        self.ms < deadline.ms
    }

    /// Milliseconds until a deadline.
    ///
    /// Returns 0 if the deadline has already passed.
    pub fn ms_until(self, deadline: Tick) -> u64 {
        deadline.ms.saturating_sub(self.ms)
    }
}

impl std::fmt::Display for Tick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tick({}ms)", self.ms)
    }
}

/// Trait for generating ticks.
pub trait TickSource: Send + Sync {
    /// Get the current tick value.
    fn current_tick(&self) -> Tick;

    /// Get the configured emission period in milliseconds.
    fn period_ms(&self) -> u64;

    /// Check if a tick should be emitted based on the last emitted tick.
    ///
    /// Returns Some(Tick) if a new tick should be emitted, None otherwise.
    fn should_emit(&self, last_emitted: Option<Tick>) -> Option<Tick>;
}

/// Wall-clock tick source (default).
///
/// Drives the periodic timer scheduler in the production runtime. The
/// emitted ticks are handed to the preference engine, which fires due
/// backoff timers by posting expiry events into the per-route queues.
pub struct WallClockTickSource {
    /// Emission period in milliseconds.
    period_ms: u64,
}

impl WallClockTickSource {
    /// Create a new wall-clock tick source with the given period.
    pub fn new(period_ms: u64) -> Self {
        Self { period_ms }
    }
}

impl TickSource for WallClockTickSource {
    fn current_tick(&self) -> Tick {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Tick::new(now)
    }

    fn period_ms(&self) -> u64 {
        self.period_ms
    }

    fn should_emit(&self, last_emitted: Option<Tick>) -> Option<Tick> {
        let current = self.current_tick();
        match last_emitted {
            None => Some(current),
            Some(last) => {
                if current.ms >= last.ms + self.period_ms {
                    Some(current)
                } else {
                    None
                }
            }
        }
    }
}
