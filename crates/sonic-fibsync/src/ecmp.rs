//! ECMP groups: one per (VRF, next-hop set).

use crate::context::HwLockState;
use crate::egress::{self, EgressObject, MultipathEgress};
use crate::error::{FibSyncError, Result};
use crate::host::HostKey;
use crate::host_table::HostTable;
use crate::nexthop::NextHopSet;
use log::debug;
use sonic_asic::{EgressAction, EgressId, Vrf};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EcmpKey {
    pub vrf: Vrf,
    pub nexthops: NextHopSet,
}

impl EcmpKey {
    pub fn new(vrf: Vrf, nexthops: NextHopSet) -> Self {
        Self { vrf, nexthops }
    }
}

impl fmt::Display for EcmpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]@{}", self.nexthops, self.vrf)
    }
}

/// The forwarding state shared by every route with the same next-hops.
///
/// Each next-hop holds a reference on its host entry for as long as the
/// group exists. With a single path the group forwards straight through
/// that host's egress id; with more it owns a multipath egress object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcmpGroup {
    pub(crate) vrf: Vrf,
    pub(crate) nexthops: NextHopSet,
    pub(crate) egress_id: EgressId,
    pub(crate) ecmp_egress_id: Option<EgressId>,
}

impl EcmpGroup {
    pub fn vrf(&self) -> Vrf {
        self.vrf
    }

    pub fn nexthops(&self) -> &NextHopSet {
        &self.nexthops
    }

    /// The id routes should point at.
    pub fn egress_id(&self) -> EgressId {
        self.egress_id
    }

    /// The multipath object, absent for single-path groups.
    pub fn ecmp_egress_id(&self) -> Option<EgressId> {
        self.ecmp_egress_id
    }
}

impl HostTable {
    /// Builds a group, releasing every host it acquired if any step fails.
    pub(crate) fn create_ecmp_group(&mut self, key: &EcmpKey, lock: HwLockState) -> Result<EcmpGroup> {
        if key.nexthops.is_empty() {
            return Err(FibSyncError::InvalidRoute(format!(
                "empty next-hop set in {}",
                key.vrf
            )));
        }
        let mut acquired = Vec::with_capacity(key.nexthops.len());
        match self.build_ecmp_group(key, &mut acquired, lock) {
            Ok(group) => Ok(group),
            Err(e) => {
                for host in acquired.iter().rev() {
                    self.release_host(host);
                }
                Err(e)
            }
        }
    }

    fn build_ecmp_group(
        &mut self,
        key: &EcmpKey,
        acquired: &mut Vec<HostKey>,
        lock: HwLockState,
    ) -> Result<EcmpGroup> {
        let mut paths = BTreeSet::new();
        for nexthop in &key.nexthops {
            let host_key = HostKey::new(key.vrf, nexthop.addr);
            let programmed = self.acquire_host(host_key, None).is_programmed();
            acquired.push(host_key);
            // Unresolved next-hops punt to the CPU, which triggers neighbor
            // discovery for them.
            if !programmed {
                self.program_host(&host_key, nexthop.intf, EgressAction::ToCpu, lock)?;
            }
            match self.hosts.get(&host_key).and_then(|host| host.egress_id()) {
                Some(id) => {
                    paths.insert(id);
                }
                None => panic!("next-hop host {} has no egress after programming", host_key),
            }
        }

        let single_path = if paths.len() == 1 {
            paths.first().copied()
        } else {
            None
        };
        let (egress_id, ecmp_egress_id) = match single_path {
            Some(only) => (only, None),
            None => {
                let id = egress::create_multipath(&self.ctx, &paths)?;
                self.insert_egress(id, EgressObject::Multipath(MultipathEgress { paths }));
                (id, Some(id))
            }
        };
        debug!("Built ecmp host {} @{}", key, egress_id);

        Ok(EcmpGroup {
            vrf: key.vrf,
            nexthops: key.nexthops.clone(),
            egress_id,
            ecmp_egress_id,
        })
    }

    /// Releases the multipath object before the member hosts it references.
    pub(crate) fn destroy_ecmp_group(&mut self, group: EcmpGroup) {
        if let Some(ecmp) = group.ecmp_egress_id {
            debug!("Releasing ecmp egress {} for [{}]", ecmp, group.nexthops);
            self.deref_egress(ecmp);
        }
        for nexthop in &group.nexthops {
            self.release_host(&HostKey::new(group.vrf, nexthop.addr));
        }
    }
}
