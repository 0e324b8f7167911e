//! Per-path preference state machine.
//!
//! Each locally-originated path owns one machine. The machine consumes
//! events (dataplane traffic evidence, remote-path assertions, timer expiry,
//! administrative changes, governing-path updates) and mutates the path's
//! [`PreferenceValue`], reporting whether a transition happened and what to
//! do with the backoff timer. Dependency fan-out and event ordering are the
//! engine's concern; the machine itself is synchronous.
//!
//! Conceptual states, combining `preference`, `wait_for_traffic` and `ecmp`:
//!
//! - `LowWaiting`: LOW, waiting for dataplane confirmation.
//! - `HighActive`: HIGH, dataplane-confirmed, sole preferred.
//! - `HighEcmp`: HIGH, administratively multi-path; flap logic disabled.
//! - `LowBackoff`: flap-damped LOW, held while the backoff window is open.

use crate::core::time::Tick;
use crate::preference::backoff::{BackoffConfig, FlapBackoff};
use crate::preference::value::{PreferenceValue, HIGH, LOW};
use std::net::IpAddr;

/// An event delivered to one path's machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathEvent {
    /// Dataplane observed traffic sourced from this path's address.
    TrafficSeen,
    /// A non-local path on the same route asserted the given preference.
    RemoteCompetitor { preference: u32 },
    /// The armed backoff window elapsed.
    BackoffExpired,
    /// Administrative override; 0 clears.
    StaticPreference { value: u32 },
    /// ECMP toggled administratively.
    EcmpChanged { enabled: bool },
    /// The governing path transitioned; mirror its value.
    GoverningUpdate { value: PreferenceValue },
}

/// Timer instruction returned to the engine after processing an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOp {
    /// Leave the timer as it is.
    Keep,
    /// (Re)arm the timer at the given deadline.
    Arm(Tick),
    /// Disarm the timer.
    Cancel,
}

/// Result of processing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// The exported PreferenceValue changed.
    pub transitioned: bool,
    /// What the engine should do with this path's backoff timer.
    pub timer: TimerOp,
}

impl Outcome {
    fn unchanged() -> Self {
        Self {
            transitioned: false,
            timer: TimerOp::Keep,
        }
    }

    fn changed() -> Self {
        Self {
            transitioned: true,
            timer: TimerOp::Keep,
        }
    }
}

/// Conceptual state, derived from the dynamic value and backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    LowWaiting,
    HighActive,
    HighEcmp,
    LowBackoff,
}

/// Dynamic (non-overridden) state remembered while a static override is
/// active, so clearing the override restores it verbatim.
#[derive(Debug, Clone, Copy)]
struct Shadow {
    preference: u32,
    wait_for_traffic: bool,
}

/// The per-path preference state machine.
#[derive(Debug)]
pub struct PathPreferenceMachine {
    /// Dynamic value; `preference`/`wait_for_traffic` are masked by the
    /// override while one is active.
    value: PreferenceValue,
    /// Active administrative override and the shadowed dynamic fields.
    static_override: Option<(u32, Shadow)>,
    backoff: FlapBackoff,
    /// Traffic has confirmed this path (directly or via its governor).
    traffic_confirmed: bool,
}

impl PathPreferenceMachine {
    /// Create a machine for a freshly installed path.
    ///
    /// ECMP paths start HIGH and never wait; a nonzero static preference
    /// starts overridden; everything else starts `LowWaiting` at sequence 0.
    pub fn new(
        backoff: BackoffConfig,
        ecmp: bool,
        static_preference: u32,
        dependent_address: Option<IpAddr>,
    ) -> Self {
        let mut value = if ecmp {
            PreferenceValue::new_ecmp()
        } else {
            PreferenceValue::new_low_waiting()
        };
        value.dependent_address = dependent_address;

        let mut machine = Self {
            value,
            static_override: None,
            backoff: FlapBackoff::new(backoff),
            traffic_confirmed: false,
        };
        if static_preference != 0 {
            machine.apply_override(static_preference);
        }
        machine
    }

    /// Consistent copy of the exported value (copy-on-read).
    pub fn value(&self) -> PreferenceValue {
        self.value
    }

    /// Conceptual state of the machine.
    pub fn state(&self) -> State {
        if self.value.ecmp {
            State::HighEcmp
        } else if !self.value.wait_for_traffic {
            State::HighActive
        } else if self.backoff.deadline().is_some() {
            State::LowBackoff
        } else {
            State::LowWaiting
        }
    }

    /// Backoff state, for reporting.
    pub fn backoff(&self) -> &FlapBackoff {
        &self.backoff
    }

    /// Governing address this path mirrors, if any.
    pub fn dependent_address(&self) -> Option<IpAddr> {
        self.value.dependent_address
    }

    /// Update the governing address binding (rebind/unbind bookkeeping).
    pub fn set_dependent_address(&mut self, address: Option<IpAddr>) {
        self.value.dependent_address = address;
    }

    /// Overwrite the exported value from a governor snapshot at bind time.
    ///
    /// All four dynamic fields are copied verbatim, including the sequence.
    pub fn snapshot_from(&mut self, governor: PreferenceValue) {
        self.value.sequence = governor.sequence;
        self.value.preference = governor.preference;
        self.value.ecmp = governor.ecmp;
        self.value.wait_for_traffic = governor.wait_for_traffic;
        self.traffic_confirmed = !governor.wait_for_traffic;
    }

    /// Restore the self-governed default after losing a governor.
    pub fn reset_to_default(&mut self) {
        self.value.preference = LOW;
        self.value.wait_for_traffic = true;
        self.value.ecmp = false;
        self.traffic_confirmed = false;
        self.backoff.reset();
    }

    /// Process one event at `now`.
    pub fn process(&mut self, event: PathEvent, now: Tick) -> Outcome {
        match event {
            PathEvent::TrafficSeen => self.on_traffic_seen(),
            PathEvent::RemoteCompetitor { preference } => self.on_remote_competitor(preference, now),
            PathEvent::BackoffExpired => self.on_backoff_expired(now),
            PathEvent::StaticPreference { value } => self.on_static_preference(value),
            PathEvent::EcmpChanged { enabled } => self.on_ecmp_changed(enabled),
            PathEvent::GoverningUpdate { value } => self.on_governing_update(value),
        }
    }

    fn on_traffic_seen(&mut self) -> Outcome {
        if self.backoff.is_suppressed() {
            // Flap cap reached: the evidence is ignored entirely, so it must
            // not count as confirmation for a later ECMP-off revert either.
            tracing::debug!("traffic confirmation suppressed by flap damping");
            return Outcome::unchanged();
        }
        self.traffic_confirmed = true;
        if self.static_override.is_some() || self.value.ecmp {
            return Outcome::unchanged();
        }
        if !self.value.wait_for_traffic {
            // Already confirmed; idempotent.
            return Outcome::unchanged();
        }
        self.value.preference = HIGH;
        self.value.wait_for_traffic = false;
        self.value.sequence += 1;
        Outcome::changed()
    }

    fn on_remote_competitor(&mut self, preference: u32, now: Tick) -> Outcome {
        if self.static_override.is_some() || self.value.ecmp {
            return Outcome::unchanged();
        }
        if self.value.wait_for_traffic || preference < self.value.preference {
            // Only a competitor at least as preferred as an active local
            // path is a flap signal.
            return Outcome::unchanged();
        }
        self.value.preference = LOW;
        self.value.wait_for_traffic = true;
        self.value.sequence += 1;
        self.traffic_confirmed = false;
        let deadline = self.backoff.record_flap(now);
        Outcome {
            transitioned: true,
            timer: TimerOp::Arm(deadline),
        }
    }

    fn on_backoff_expired(&mut self, now: Tick) -> Outcome {
        let timer = match self.backoff.on_expire(now) {
            Some(deadline) => TimerOp::Arm(deadline),
            None => TimerOp::Cancel,
        };
        Outcome {
            transitioned: false,
            timer,
        }
    }

    fn on_static_preference(&mut self, value: u32) -> Outcome {
        match (value, self.static_override) {
            (0, None) => Outcome::unchanged(),
            (0, Some((_, shadow))) => {
                // Revert to the dynamic state as if the override had never
                // been applied.
                self.static_override = None;
                self.value.preference = shadow.preference;
                self.value.wait_for_traffic = shadow.wait_for_traffic;
                self.value.static_preference = false;
                Outcome::changed()
            }
            (v, _) => {
                self.apply_override(v);
                Outcome::changed()
            }
        }
    }

    fn apply_override(&mut self, value: u32) {
        let shadow = match self.static_override {
            // Re-setting an override keeps the original shadow.
            Some((_, shadow)) => shadow,
            None => Shadow {
                preference: self.value.preference,
                wait_for_traffic: self.value.wait_for_traffic,
            },
        };
        self.static_override = Some((value, shadow));
        self.value.preference = value;
        // LOW and HIGH map to canonical dynamic semantics; any other value
        // passes through verbatim and still waits for confirmation.
        self.value.wait_for_traffic = value < HIGH;
        self.value.static_preference = true;
    }

    fn on_ecmp_changed(&mut self, enabled: bool) -> Outcome {
        if self.value.ecmp == enabled {
            return Outcome::unchanged();
        }
        self.value.ecmp = enabled;
        if enabled {
            // ECMP is unconditionally HIGH and never waits; flap damping is
            // disabled while it is set.
            self.value.preference = HIGH;
            self.value.wait_for_traffic = false;
            self.backoff.reset();
            Outcome {
                transitioned: true,
                timer: TimerOp::Cancel,
            }
        } else if let Some((value, _)) = self.static_override {
            self.value.preference = value;
            self.value.wait_for_traffic = value < HIGH;
            Outcome::changed()
        } else if self.traffic_confirmed {
            self.value.preference = HIGH;
            self.value.wait_for_traffic = false;
            Outcome::changed()
        } else {
            self.value.preference = LOW;
            self.value.wait_for_traffic = true;
            Outcome::changed()
        }
    }

    fn on_governing_update(&mut self, value: PreferenceValue) -> Outcome {
        if self.static_override.is_some() {
            return Outcome::unchanged();
        }
        self.traffic_confirmed = !value.wait_for_traffic;
        let changed = self.value.preference != value.preference
            || self.value.ecmp != value.ecmp
            || self.value.wait_for_traffic != value.wait_for_traffic;
        if !changed {
            return Outcome::unchanged();
        }
        // Propagated transitions are observed verbatim; the dependent's own
        // sequence is not advanced.
        self.value.preference = value.preference;
        self.value.ecmp = value.ecmp;
        self.value.wait_for_traffic = value.wait_for_traffic;
        Outcome::changed()
    }
}
