//! Preference attributes and path identity types.
//!
//! A [`PreferenceValue`] is attached to exactly one (route, originating-peer)
//! pair, a *path*. Distinct interfaces advertising the same destination
//! prefix own independent values and machines; traffic observed with a given
//! MAC and interface affects only the path whose owning peer matches.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;

/// Reserved preference denoting the default non-preferred state.
pub const LOW: u32 = 100;

/// Reserved preference denoting the preferred state.
pub const HIGH: u32 = 200;

/// The preference attributes of one route path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceValue {
    /// Monotonically non-decreasing transition counter.
    ///
    /// Incremented on every state transition produced by this path's
    /// machine; reset to 0 only when the path is destroyed and recreated.
    pub sequence: u32,

    /// Numeric desirability; higher is more preferred.
    ///
    /// [`LOW`] and [`HIGH`] denote the default dynamic policy. Any other
    /// positive value is an administrative override stored verbatim.
    pub preference: u32,

    /// Path participates in multi-path forwarding.
    ///
    /// An ECMP path is unconditionally HIGH and never waits for traffic.
    pub ecmp: bool,

    /// Path is LOW pending dataplane confirmation.
    pub wait_for_traffic: bool,

    /// An administrative override is active.
    pub static_preference: bool,

    /// Governing address, if this path mirrors another path's transitions.
    pub dependent_address: Option<IpAddr>,
}

impl PreferenceValue {
    /// Initial value of a freshly created non-ECMP, non-static path.
    pub fn new_low_waiting() -> Self {
        Self {
            sequence: 0,
            preference: LOW,
            ecmp: false,
            wait_for_traffic: true,
            static_preference: false,
            dependent_address: None,
        }
    }

    /// Initial value of an administratively multi-path path.
    pub fn new_ecmp() -> Self {
        Self {
            sequence: 0,
            preference: HIGH,
            ecmp: true,
            wait_for_traffic: false,
            static_preference: false,
            dependent_address: None,
        }
    }

    /// Check if this path is currently preferred.
    pub fn is_high(&self) -> bool {
        self.preference >= HIGH
    }

    /// Remote-path constructor used by control-plane import notifications.
    pub fn remote(sequence: u32, preference: u32) -> Self {
        Self {
            sequence,
            preference,
            ecmp: false,
            wait_for_traffic: false,
            static_preference: false,
            dependent_address: None,
        }
    }
}

impl std::fmt::Display for PreferenceValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "seq={} pref={} ecmp={} wait={}",
            self.sequence, self.preference, self.ecmp, self.wait_for_traffic
        )
    }
}

/// Identifier of a VRF (routing instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VrfId(pub u32);

impl std::fmt::Display for VrfId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vrf{}", self.0)
    }
}

/// Identifier of a virtual-machine interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterfaceId(pub u32);

impl std::fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "intf{}", self.0)
    }
}

/// A 48-bit MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// The all-zero MAC, used to mean "no MAC configured".
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    /// Check if this is the all-zero MAC.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl std::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut count = 0;
        for part in s.split(':') {
            if count == 6 {
                return Err(format!("malformed mac address: {s}"));
            }
            bytes[count] =
                u8::from_str_radix(part, 16).map_err(|_| format!("malformed mac address: {s}"))?;
            count += 1;
        }
        if count != 6 {
            return Err(format!("malformed mac address: {s}"));
        }
        Ok(MacAddress(bytes))
    }
}

/// Which route table within a VRF a route lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RouteTableKind {
    /// Unicast inet (v4/v6) table.
    Inet,
    /// L2/EVPN table holding MAC+IP mirror routes.
    Evpn,
}

/// Identity of a destination route: (table, VRF, prefix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteKey {
    pub vrf: VrfId,
    pub table: RouteTableKind,
    pub prefix: IpAddr,
    pub prefix_len: u8,
}

impl RouteKey {
    /// Inet route key.
    pub fn inet(vrf: VrfId, prefix: IpAddr, prefix_len: u8) -> Self {
        Self {
            vrf,
            table: RouteTableKind::Inet,
            prefix,
            prefix_len,
        }
    }

    /// Host route (full-length prefix) in the inet table.
    pub fn host(vrf: VrfId, address: IpAddr) -> Self {
        Self::inet(vrf, address, host_prefix_len(&address))
    }

    /// EVPN mirror route key for a MAC+IP binding.
    ///
    /// The MAC dimension is carried by the owning path, not the key; one
    /// EVPN route per (vrf, address) is sufficient for preference tracking.
    pub fn evpn(vrf: VrfId, address: IpAddr) -> Self {
        Self {
            vrf,
            table: RouteTableKind::Evpn,
            prefix: address,
            prefix_len: host_prefix_len(&address),
        }
    }

    /// Check if this is a host route (full-length prefix).
    pub fn is_host(&self) -> bool {
        self.prefix_len == host_prefix_len(&self.prefix)
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = match self.table {
            RouteTableKind::Inet => "inet",
            RouteTableKind::Evpn => "evpn",
        };
        write!(
            f,
            "{}:{}:{}/{}",
            self.vrf, table, self.prefix, self.prefix_len
        )
    }
}

/// Full prefix length for an address family.
pub fn host_prefix_len(address: &IpAddr) -> u8 {
    match address {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Originating peer of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerId {
    /// A local virtual-machine interface.
    Interface(InterfaceId),
    /// A remote control-plane peer, identified by name.
    Remote(String),
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerId::Interface(id) => write!(f, "{id}"),
            PeerId::Remote(name) => write!(f, "peer:{name}"),
        }
    }
}

/// Identity of one path: (route, originating peer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathId {
    pub route: RouteKey,
    pub peer: PeerId,
}

impl PathId {
    pub fn new(route: RouteKey, peer: PeerId) -> Self {
        Self { route, peer }
    }
}

impl std::fmt::Display for PathId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.route, self.peer)
    }
}
