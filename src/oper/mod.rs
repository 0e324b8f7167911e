//! Operational configuration collaborators of the preference engine.

pub mod interface;
pub mod route;

pub use interface::{
    AllowedAddressPair, FloatingIp, InterfaceTable, ServiceIp, StaticRouteEntry, VmInterface,
};
pub use route::{derive_paths, LocalPathTemplate, RouteView};
