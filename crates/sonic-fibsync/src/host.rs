//! Host entries: one per (VRF, IP) next-hop or host route.
//!
//! A host entry owns, or shares, one unicast egress object and the exact-match
//! host row that points at it. The egress object is reprogrammed in place as
//! the neighbor resolves, moves ports or goes away, so the host row itself
//! never has to change.

use crate::context::HwLockState;
use crate::egress::{self, EgressObject, UnicastEgress};
use crate::error::{FibSyncError, HwContextExt, Result};
use crate::host_table::HostTable;
use log::{debug, error};
use sonic_asic::{EgressAction, EgressId, InterfaceId, L3EgressRow, L3HostRow, PortId, Vrf};
use std::fmt;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostKey {
    pub vrf: Vrf,
    pub addr: IpAddr,
}

impl HostKey {
    pub fn new(vrf: Vrf, addr: IpAddr) -> Self {
        Self { vrf, addr }
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.addr, self.vrf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub(crate) vrf: Vrf,
    pub(crate) addr: IpAddr,
    pub(crate) intf: Option<InterfaceId>,
    pub(crate) egress_id: Option<EgressId>,
    pub(crate) port: Option<PortId>,
    pub(crate) added: bool,
}

impl HostEntry {
    pub(crate) fn new(vrf: Vrf, addr: IpAddr) -> Self {
        Self {
            vrf,
            addr,
            intf: None,
            egress_id: None,
            port: None,
            added: false,
        }
    }

    /// A host that forwards through an egress object someone else created.
    pub(crate) fn with_egress(vrf: Vrf, addr: IpAddr, egress: EgressId) -> Self {
        Self {
            egress_id: Some(egress),
            ..Self::new(vrf, addr)
        }
    }

    pub fn key(&self) -> HostKey {
        HostKey::new(self.vrf, self.addr)
    }

    pub fn vrf(&self) -> Vrf {
        self.vrf
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn egress_id(&self) -> Option<EgressId> {
        self.egress_id
    }

    pub fn port(&self) -> Option<PortId> {
        self.port
    }

    /// The interface of the last `program` call, if any.
    pub fn intf(&self) -> Option<InterfaceId> {
        self.intf
    }

    pub fn is_added(&self) -> bool {
        self.added
    }

    /// Has an egress object to forward through.
    pub fn is_programmed(&self) -> bool {
        self.egress_id.is_some()
    }
}

impl HostTable {
    fn host_mut(&mut self, key: &HostKey) -> &mut HostEntry {
        match self.hosts.get_mut(key) {
            Some(host) => host,
            None => panic!("host {} is not registered", key),
        }
    }

    /// Points the host at `action` through interface `intf`.
    ///
    /// Allocates an egress object on first use and reprograms it in place
    /// after that, adds the host row if it is not in hardware yet and moves
    /// the egress id to its new output port.
    pub(crate) fn program_host(
        &mut self,
        key: &HostKey,
        intf: InterfaceId,
        action: EgressAction,
        lock: HwLockState,
    ) -> Result<()> {
        let (egress_id, old_port, added) = {
            let host = self.host_mut(key);
            (host.egress_id, host.port, host.added)
        };
        let desired = UnicastEgress {
            vrf: key.vrf,
            addr: key.addr,
            row: L3EgressRow { intf, action },
        };

        let id = match egress_id {
            Some(id) => {
                let current = match self.egress.get(&id) {
                    Some(EgressObject::Unicast(current)) if current.owned_by(key) => current,
                    _ => {
                        return Err(FibSyncError::EgressInUse {
                            vrf: key.vrf,
                            addr: key.addr,
                            egress: id,
                        })
                    }
                };
                egress::program_unicast(&self.ctx, Some((id, current)), &desired)?;
                if let Some(object) = self.egress.get_mut(&id) {
                    *object = EgressObject::Unicast(desired);
                }
                id
            }
            None => {
                let id = egress::program_unicast(&self.ctx, None, &desired)?;
                self.insert_egress(id, EgressObject::Unicast(desired));
                self.host_mut(key).egress_id = Some(id);
                id
            }
        };
        self.host_mut(key).intf = Some(intf);

        if !added {
            self.add_host_row(key, false)?;
        }

        let new_port = action_port(&action);
        self.host_mut(key).port = new_port;
        debug!("Updated port for {} from {:?} to {:?}", id, old_port, new_port);
        self.update_port_egress_mapping(id, old_port, new_port, lock);
        Ok(())
    }

    /// The host forwards through a unicast egress programmed for its own
    /// address, rather than one borrowed from a route or another next-hop.
    pub(crate) fn owns_egress(&self, key: &HostKey) -> bool {
        let Some(id) = self.hosts.get(key).and_then(|host| host.egress_id) else {
            return false;
        };
        matches!(self.egress.get(&id), Some(EgressObject::Unicast(current)) if current.owned_by(key))
    }

    /// Adds the host row pointing at the host's egress id. Idempotent.
    ///
    /// During warm boot a row already in hardware for the same address is
    /// adopted when equivalent. A host row pointing elsewhere means the
    /// bookkeeping has diverged from hardware and is fatal.
    pub(crate) fn add_host_row(&mut self, key: &HostKey, multipath: bool) -> Result<()> {
        let host = self.host_mut(key);
        if host.added {
            return Ok(());
        }
        let Some(egress) = host.egress_id else {
            panic!("host {} has no egress object to add a row for", key);
        };
        let row = L3HostRow::new(key.vrf, key.addr, egress, multipath);

        let cached = self.ctx.warm_boot().find_host(key.vrf, key.addr);
        match cached {
            Some(existing) => {
                if !row.equivalent(&existing) {
                    panic!(
                        "host entries should never change: {} cached {:?}, wanted {:?}",
                        key, existing, row
                    );
                }
                debug!("Host entry for {} already exists", key);
                self.ctx.warm_boot().programmed_host(key.vrf, key.addr);
            }
            None => {
                self.ctx
                    .asic()
                    .host_add(&row)
                    .hw_context(|| format!("program L3 host {} @{}", key, egress))?;
                debug!("Created L3 host {} @{}", key, egress);
            }
        }
        self.host_mut(key).added = true;
        Ok(())
    }

    /// Tears down a host whose last reference was just released.
    pub(crate) fn destroy_host(&mut self, host: HostEntry) {
        let key = host.key();
        if host.added {
            match self.ctx.asic().host_delete(host.vrf, host.addr) {
                Ok(()) => debug!("Deleted L3 host {}", key),
                Err(e) => error!("Failed to delete L3 host {}: {}", key, e),
            }
        }
        if let Some(egress) = host.egress_id {
            self.update_port_egress_mapping(egress, host.port, None, HwLockState::Held);
            self.deref_egress(egress);
        }
    }
}

fn action_port(action: &EgressAction) -> Option<PortId> {
    match action {
        EgressAction::Forward { port, .. } => Some(*port),
        EgressAction::Drop | EgressAction::ToCpu => None,
    }
}
