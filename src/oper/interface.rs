//! Virtual-machine interface model and table.
//!
//! The interface table is the configuration-side collaborator of the
//! preference engine. Applying an interface configuration derives the local
//! paths it calls for and reconciles them against what is installed:
//! brand-new paths are installed (machine created, sequence 0), removed ones
//! withdrawn, and in-place attribute changes (ECMP mode, static preference,
//! governing address) are forwarded to the live machine without recreating
//! it. Configuration that derives the same paths, such as a security-group
//! change, touches nothing.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use crate::core::error::{AgentError, AgentResult};
use crate::oper::route::{derive_paths, LocalPathTemplate};
use crate::preference::engine::PreferenceEngine;
use crate::preference::value::{InterfaceId, MacAddress, PathId, VrfId};

/// An allowed-address pair: an extra address the workload may answer for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedAddressPair {
    pub address: IpAddr,
    pub prefix_len: u8,
    /// MAC the pair answers with; zero means the interface MAC.
    pub mac: MacAddress,
    /// Active-active pairs are ECMP; active-backup pairs wait for traffic.
    pub active_active: bool,
}

/// A floating IP bound to this interface, advertised in another VRF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatingIp {
    pub address: IpAddr,
    pub vrf: VrfId,
}

/// A service instance IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIp {
    pub address: IpAddr,
    pub ecmp: bool,
    /// Address whose path this service IP follows. `None` means the
    /// interface primary IP; the service address itself means "observe own
    /// traffic".
    pub tracking_ip: Option<IpAddr>,
}

/// One subnet from an interface static-route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRouteEntry {
    pub prefix: IpAddr,
    pub prefix_len: u8,
}

/// Configuration of one virtual-machine interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmInterface {
    pub id: InterfaceId,
    pub vrf: VrfId,
    pub mac: MacAddress,
    pub primary_ip: IpAddr,
    pub allowed_address_pairs: Vec<AllowedAddressPair>,
    pub floating_ips: Vec<FloatingIp>,
    pub service_ips: Vec<ServiceIp>,
    pub static_routes: Vec<StaticRouteEntry>,
    /// Administrative preference override for every path this interface
    /// originates; 0 means none.
    pub static_preference: u32,
    /// Attached security groups. Never affects path preference.
    pub security_groups: Vec<u32>,
    pub active: bool,
}

impl VmInterface {
    /// Check if `address` is one the interface may answer for: the primary
    /// IP or any allowed-address pair.
    pub fn is_allowed_address(&self, address: IpAddr) -> bool {
        self.primary_ip == address
            || self
                .allowed_address_pairs
                .iter()
                .any(|pair| pair.address == address)
    }
}

struct Installed {
    template: LocalPathTemplate,
    path: PathId,
}

struct Record {
    config: VmInterface,
    installed: Vec<Installed>,
}

/// Table of known interfaces, reconciling configuration into engine paths.
pub struct InterfaceTable {
    engine: Arc<PreferenceEngine>,
    entries: HashMap<InterfaceId, Record>,
}

impl InterfaceTable {
    pub fn new(engine: Arc<PreferenceEngine>) -> Self {
        Self {
            engine,
            entries: HashMap::new(),
        }
    }

    /// Current configuration of an interface.
    pub fn get(&self, id: InterfaceId) -> Option<&VmInterface> {
        self.entries.get(&id).map(|record| &record.config)
    }

    /// Installed path ids of an interface.
    pub fn paths(&self, id: InterfaceId) -> Vec<PathId> {
        self.entries
            .get(&id)
            .map(|record| record.installed.iter().map(|i| i.path.clone()).collect())
            .unwrap_or_default()
    }

    /// Apply an interface configuration, reconciling installed paths.
    ///
    /// Invalid configuration (bad tracking IP) is rejected whole; the
    /// previously installed paths are left untouched.
    pub fn apply(&mut self, config: VmInterface) -> AgentResult<()> {
        let id = config.id;
        let desired = if config.active {
            derive_paths(&config)?
        } else {
            Vec::new()
        };

        let mut previous = match self.entries.remove(&id) {
            Some(record) => record.installed,
            None => Vec::new(),
        };

        let mut installed = Vec::with_capacity(desired.len());
        for template in desired {
            let existing = previous
                .iter()
                .position(|i| i.template.route == template.route);
            match existing {
                None => {
                    installed.push(self.install(id, template));
                }
                Some(index) => {
                    let current = previous.swap_remove(index);
                    installed.push(self.reconcile(id, current, template)?);
                }
            }
        }
        for stale in previous {
            self.engine.withdraw_local_path(&stale.path);
        }

        tracing::info!(interface = %id, active = config.active,
            paths = installed.len(), "interface applied");
        self.entries.insert(
            id,
            Record {
                config,
                installed,
            },
        );
        Ok(())
    }

    /// Remove an interface entirely, withdrawing its paths.
    pub fn remove(&mut self, id: InterfaceId) {
        if let Some(record) = self.entries.remove(&id) {
            for installed in record.installed {
                self.engine.withdraw_local_path(&installed.path);
            }
            tracing::info!(interface = %id, "interface removed");
        }
    }

    /// Activate or deactivate an interface.
    ///
    /// Reactivation reinstalls every path from scratch: machines are
    /// recreated with sequence 0, waiting for traffic again.
    pub fn set_active(&mut self, id: InterfaceId, active: bool) -> AgentResult<()> {
        let mut config = self
            .entries
            .get(&id)
            .map(|record| record.config.clone())
            .ok_or(AgentError::UnknownInterface { interface: id })?;
        if config.active == active {
            return Ok(());
        }
        config.active = active;
        self.apply(config)
    }

    fn install(&self, id: InterfaceId, template: LocalPathTemplate) -> Installed {
        let path = self.engine.install_local_path(
            template.route,
            id,
            template.mac,
            template.ecmp,
            template.static_preference,
            template.governor,
        );
        Installed { template, path }
    }

    /// Forward in-place attribute changes to the live machine.
    ///
    /// A MAC change recreates the path; everything else preserves the
    /// machine and its sequence.
    fn reconcile(
        &self,
        id: InterfaceId,
        current: Installed,
        template: LocalPathTemplate,
    ) -> AgentResult<Installed> {
        if current.template == template {
            return Ok(current);
        }
        if current.template.mac != template.mac {
            self.engine.withdraw_local_path(&current.path);
            return Ok(self.install(id, template));
        }
        if current.template.ecmp != template.ecmp {
            self.engine.set_ecmp(current.path.clone(), template.ecmp)?;
        }
        if current.template.static_preference != template.static_preference {
            self.engine
                .set_static_preference(current.path.clone(), template.static_preference)?;
        }
        if current.template.governor != template.governor {
            self.engine.rebind(&current.path, template.governor)?;
        }
        Ok(Installed {
            template,
            path: current.path,
        })
    }
}
