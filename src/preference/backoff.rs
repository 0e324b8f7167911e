//! Per-path flap backoff.
//!
//! A remote peer re-asserting a competing path before local traffic confirms
//! the local one is a flap signal. Each flap doubles the hold-down interval
//! up to a ceiling; an idle window with no flap decays the interval back
//! toward the floor and clears the flap counter. Once the flap counter
//! reaches the cap, traffic-seen events are suppressed until the timer
//! fires, so the agent withdraws its path instead of oscillating faster than
//! the remote control plane can converge.

use crate::core::time::Tick;
use serde::{Deserialize, Serialize};

/// Backoff tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Hold-down floor in milliseconds.
    pub base_interval_ms: u64,
    /// Hold-down ceiling in milliseconds.
    pub max_interval_ms: u64,
    /// Consecutive flaps after which traffic confirmation is suppressed.
    pub max_flap_count: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 100,
            max_interval_ms: 3_200,
            max_flap_count: 4,
        }
    }
}

/// Flap-damping state for one path.
#[derive(Debug, Clone)]
pub struct FlapBackoff {
    config: BackoffConfig,
    /// Current hold-down interval.
    interval_ms: u64,
    /// Consecutive flaps observed without an intervening idle window.
    flap_count: u32,
    /// Armed timer deadline, if any.
    deadline: Option<Tick>,
    /// A flap landed inside the currently-open window.
    flapped_in_window: bool,
    /// Traffic confirmation is suppressed until the timer fires.
    suppressed: bool,
}

impl FlapBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            interval_ms: config.base_interval_ms,
            flap_count: 0,
            deadline: None,
            flapped_in_window: false,
            suppressed: false,
        }
    }

    /// Current hold-down interval in milliseconds.
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Consecutive flap count.
    pub fn flap_count(&self) -> u32 {
        self.flap_count
    }

    /// Armed deadline, if a window is open.
    pub fn deadline(&self) -> Option<Tick> {
        self.deadline
    }

    /// Check if traffic confirmation is currently suppressed.
    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Record a flap at `now`.
    ///
    /// Doubles the interval (capped) on every flap after the first in a
    /// streak, bumps the counter (saturating at the cap) and (re)arms the
    /// window. Entering the cap turns suppression on. Returns the new
    /// deadline.
    pub fn record_flap(&mut self, now: Tick) -> Tick {
        if self.flap_count > 0 {
            self.interval_ms = (self.interval_ms * 2).min(self.config.max_interval_ms);
        }
        if self.flap_count < self.config.max_flap_count {
            self.flap_count += 1;
        }
        if self.flap_count >= self.config.max_flap_count {
            self.suppressed = true;
        }
        // A flap landing inside an open window marks it; the mark survives
        // the re-arm so the elapsed window is known to have flapped.
        if self.deadline.is_some() {
            self.flapped_in_window = true;
        }
        let deadline = now.add_ms(self.interval_ms);
        self.deadline = Some(deadline);
        deadline
    }

    /// Handle window expiry at `now`.
    ///
    /// Always clears suppression. If a flap landed in the just-elapsed
    /// window the interval (already doubled by that flap) is held for one
    /// more window; otherwise the window was idle and the interval decays
    /// toward the floor with the counter reset. Returns the next deadline
    /// when a follow-up window is armed.
    pub fn on_expire(&mut self, now: Tick) -> Option<Tick> {
        self.deadline = None;
        self.suppressed = false;

        if self.flapped_in_window {
            self.flapped_in_window = false;
            let deadline = now.add_ms(self.interval_ms);
            self.deadline = Some(deadline);
            return Some(deadline);
        }

        self.interval_ms = (self.interval_ms / 2).max(self.config.base_interval_ms);
        self.flap_count = 0;
        if self.interval_ms > self.config.base_interval_ms {
            // Keep a decay window open until the interval collapses back
            // to the floor.
            let deadline = now.add_ms(self.interval_ms);
            self.deadline = Some(deadline);
            Some(deadline)
        } else {
            None
        }
    }

    /// Disarm any open window without decaying.
    pub fn cancel(&mut self) {
        self.deadline = None;
        self.flapped_in_window = false;
        self.suppressed = false;
    }

    /// Reset to the initial state (floor interval, counter 0, disarmed).
    pub fn reset(&mut self) {
        self.interval_ms = self.config.base_interval_ms;
        self.flap_count = 0;
        self.deadline = None;
        self.flapped_in_window = false;
        self.suppressed = false;
    }
}
