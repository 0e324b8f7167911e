//! Local path derivation and route read view.
//!
//! An active virtual-machine interface materializes a set of local paths:
//! the primary-IP host route, one route per allowed-address pair (plus an
//! EVPN mirror when the pair carries a MAC), floating-IP routes in their
//! target VRFs, interface static-route subnets and service IPs. Each path
//! is described by a [`LocalPathTemplate`]; the interface table diffs the
//! derived templates against what is installed and drives the engine
//! accordingly, so unrelated configuration churn never disturbs a live
//! path's machine.

use std::net::IpAddr;
use std::sync::Arc;

use crate::core::error::{AgentError, AgentResult};
use crate::oper::interface::VmInterface;
use crate::preference::dependency::GoverningAddress;
use crate::preference::engine::PreferenceEngine;
use crate::preference::value::{host_prefix_len, MacAddress, PathId, PreferenceValue, RouteKey};

/// Everything needed to install one local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPathTemplate {
    pub route: RouteKey,
    /// MAC traffic must carry to confirm this path; zero matches any.
    pub mac: MacAddress,
    pub ecmp: bool,
    /// Administrative override; 0 means none.
    pub static_preference: u32,
    /// Governing address this path mirrors, if it cannot observe traffic
    /// itself.
    pub governor: Option<GoverningAddress>,
}

/// Derive the local paths an interface's configuration calls for.
///
/// Returns an error when a service-IP tracking address is not among the
/// interface's allowed addresses; nothing is installed in that case.
pub fn derive_paths(interface: &VmInterface) -> AgentResult<Vec<LocalPathTemplate>> {
    let mut paths = Vec::new();
    let static_preference = interface.static_preference;
    let vrf = interface.vrf;

    paths.push(LocalPathTemplate {
        route: RouteKey::host(vrf, interface.primary_ip),
        mac: interface.mac,
        ecmp: false,
        static_preference,
        governor: None,
    });

    for pair in &interface.allowed_address_pairs {
        let mac = if pair.mac.is_zero() {
            interface.mac
        } else {
            pair.mac
        };
        paths.push(LocalPathTemplate {
            route: RouteKey::inet(vrf, pair.address, pair.prefix_len),
            mac,
            ecmp: pair.active_active,
            static_preference,
            governor: None,
        });
        // A MAC+IP pair also appears in the L2 table; the mirror follows
        // the inet route instead of observing traffic itself.
        if !pair.mac.is_zero() && pair.prefix_len == host_prefix_len(&pair.address) {
            paths.push(LocalPathTemplate {
                route: RouteKey::evpn(vrf, pair.address),
                mac,
                ecmp: pair.active_active,
                static_preference,
                governor: Some(GoverningAddress::new(vrf, pair.address)),
            });
        }
    }

    let primary_governor = Some(GoverningAddress::new(vrf, interface.primary_ip));

    for floating in &interface.floating_ips {
        paths.push(LocalPathTemplate {
            route: RouteKey::host(floating.vrf, floating.address),
            mac: interface.mac,
            ecmp: false,
            static_preference,
            governor: primary_governor,
        });
    }

    for entry in &interface.static_routes {
        paths.push(LocalPathTemplate {
            route: RouteKey::inet(vrf, entry.prefix, entry.prefix_len),
            mac: MacAddress::ZERO,
            ecmp: false,
            static_preference,
            governor: primary_governor,
        });
    }

    for service in &interface.service_ips {
        let governor = match service.tracking_ip {
            // Tracking the service address itself means the path observes
            // its own traffic.
            Some(tracking) if tracking == service.address => None,
            Some(tracking) => {
                if !interface.is_allowed_address(tracking) {
                    return Err(AgentError::InvalidTrackingIp {
                        ip: tracking,
                        interface: interface.id,
                    });
                }
                Some(GoverningAddress::new(vrf, tracking))
            }
            None => primary_governor,
        };
        paths.push(LocalPathTemplate {
            route: RouteKey::host(vrf, service.address),
            mac: interface.mac,
            ecmp: service.ecmp,
            static_preference,
            governor,
        });
    }

    Ok(paths)
}

/// Copy-on-read view over the engine's route state.
///
/// Snapshots are consistent copies; a reader never observes a machine
/// mid-transition.
pub struct RouteView {
    engine: Arc<PreferenceEngine>,
}

impl RouteView {
    pub fn new(engine: Arc<PreferenceEngine>) -> Self {
        Self { engine }
    }

    /// Current value of one path.
    pub fn path_preference(&self, path: &PathId) -> Option<PreferenceValue> {
        self.engine.path_preference(path)
    }

    /// All local path values on a route.
    pub fn route_preferences(&self, route: &RouteKey) -> Vec<(PathId, PreferenceValue)> {
        self.engine.route_preferences(route)
    }

    /// Remote assertions stored on a route, per peer name.
    pub fn remote_preferences(&self, route: &RouteKey) -> Vec<(String, PreferenceValue)> {
        self.engine.remote_preferences(route)
    }

    /// Check if any local path on the route is currently preferred.
    pub fn is_preferred(&self, route: &RouteKey) -> bool {
        self.engine
            .route_preferences(route)
            .iter()
            .any(|(_, value)| value.is_high())
    }
}
