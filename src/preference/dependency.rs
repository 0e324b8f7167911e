//! Governing-address dependency index.
//!
//! Some local routes do not observe traffic themselves; their preference
//! mirrors the path of a *governing address* in the same VRF. Interface
//! static-route subnets follow the interface's primary IP, floating-IP
//! routes and EVPN mirror routes follow the native primary IP, and
//! service-VRF routes follow a configured tracking IP. The index holds the
//! directed edges `governing address -> dependent paths`; the engine walks
//! them after a governor transition to propagate the new value.
//!
//! Propagation is one level deep. A governed path is never itself a
//! governor, so the walk cannot cycle.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use crate::preference::value::{PathId, VrfId};

/// A governing address, scoped to its VRF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GoverningAddress {
    pub vrf: VrfId,
    pub address: IpAddr,
}

impl GoverningAddress {
    pub fn new(vrf: VrfId, address: IpAddr) -> Self {
        Self { vrf, address }
    }
}

impl std::fmt::Display for GoverningAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.vrf, self.address)
    }
}

/// Directed edges from governing addresses to their dependent paths.
#[derive(Debug, Default)]
pub struct DependencyIndex {
    dependents: HashMap<GoverningAddress, HashSet<PathId>>,
    governor_of: HashMap<PathId, GoverningAddress>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `dependent` to `governor`, replacing any previous edge.
    ///
    /// Returns the governor the dependent was previously bound to, if the
    /// bind was a rebind.
    pub fn bind(&mut self, dependent: PathId, governor: GoverningAddress) -> Option<GoverningAddress> {
        let previous = self.unbind(&dependent);
        self.dependents
            .entry(governor)
            .or_default()
            .insert(dependent.clone());
        self.governor_of.insert(dependent, governor);
        previous
    }

    /// Remove the dependent's edge, returning its former governor.
    pub fn unbind(&mut self, dependent: &PathId) -> Option<GoverningAddress> {
        let governor = self.governor_of.remove(dependent)?;
        if let Some(set) = self.dependents.get_mut(&governor) {
            set.remove(dependent);
            if set.is_empty() {
                self.dependents.remove(&governor);
            }
        }
        Some(governor)
    }

    /// Governor the dependent is currently bound to.
    pub fn governor_of(&self, dependent: &PathId) -> Option<GoverningAddress> {
        self.governor_of.get(dependent).copied()
    }

    /// Paths bound to the given governor.
    pub fn dependents_of(&self, governor: GoverningAddress) -> Vec<PathId> {
        self.dependents
            .get(&governor)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check if any path depends on the given governor.
    pub fn has_dependents(&self, governor: GoverningAddress) -> bool {
        self.dependents.contains_key(&governor)
    }

    /// Number of tracked dependents.
    pub fn len(&self) -> usize {
        self.governor_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.governor_of.is_empty()
    }
}
