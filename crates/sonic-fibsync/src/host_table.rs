//! Registry of host entries, ECMP groups and egress objects.
//!
//! `HostTable` is the single owner of every shared hardware object on the
//! unicast path. Each object lives in a [`RefMap`] slot with an explicit
//! reference count; routes and neighbors hold keys, never pointers, and
//! objects are torn down when the last key is released. The table also
//! maintains the port to egress-id index that turns link events into ECMP
//! membership changes.
//!
//! Every method that changes a reference count expects the hardware lock to
//! be held by the caller.

use crate::context::{HwContext, HwLockState};
use crate::ecmp::{EcmpGroup, EcmpKey};
use crate::egress::{self, EgressObject};
use crate::error::{FibSyncError, HwContextExt, Result};
use crate::host::{HostEntry, HostKey};
use crate::nexthop::NextHopSet;
use crate::port_egress::PortEgressIndex;
use crate::ref_map::{RefMap, Released};
use log::{debug, error, info};
use sonic_asic::{EgressId, PortId, Vrf};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;

pub struct HostTable {
    pub(crate) ctx: Arc<HwContext>,
    pub(crate) hosts: RefMap<HostKey, HostEntry>,
    pub(crate) ecmp_hosts: RefMap<EcmpKey, EcmpGroup>,
    pub(crate) egress: RefMap<EgressId, EgressObject>,
    egress_to_port: BTreeMap<EgressId, PortId>,
    port_egress: Arc<PortEgressIndex>,
}

impl HostTable {
    pub fn new(ctx: Arc<HwContext>) -> Self {
        Self {
            ctx,
            hosts: RefMap::new(),
            ecmp_hosts: RefMap::new(),
            egress: RefMap::new(),
            egress_to_port: BTreeMap::new(),
            port_egress: Arc::new(PortEgressIndex::new()),
        }
    }

    pub fn context(&self) -> &Arc<HwContext> {
        &self.ctx
    }

    // Host entries

    /// Takes a reference on the host for `addr`, creating an unprogrammed
    /// entry if there is none.
    pub fn inc_ref_or_create_host(&mut self, vrf: Vrf, addr: IpAddr) -> &HostEntry {
        self.acquire_host(HostKey::new(vrf, addr), None)
    }

    /// Like [`inc_ref_or_create_host`](Self::inc_ref_or_create_host), but a
    /// newly created host forwards through `egress` and holds a reference to
    /// it. An existing host keeps its own egress.
    pub fn inc_ref_or_create_host_with_egress(
        &mut self,
        vrf: Vrf,
        addr: IpAddr,
        egress: EgressId,
    ) -> &HostEntry {
        self.acquire_host(HostKey::new(vrf, addr), Some(egress))
    }

    pub(crate) fn acquire_host(&mut self, key: HostKey, egress: Option<EgressId>) -> &HostEntry {
        if self.hosts.contains_key(&key) {
            let Some(host) = self.hosts.increment_ref(&key) else {
                unreachable!("host {} vanished", key);
            };
            return host;
        }
        let host = match egress {
            Some(egress) => {
                self.inc_egress_ref(egress);
                HostEntry::with_egress(key.vrf, key.addr, egress)
            }
            None => HostEntry::new(key.vrf, key.addr),
        };
        debug!("Created host entry {}", key);
        self.hosts.insert_new(key, host)
    }

    /// Drops one reference on a host, destroying it with the last one.
    /// Returns the remaining count.
    ///
    /// # Panics
    ///
    /// If the host is not registered.
    pub fn deref_host(&mut self, vrf: Vrf, addr: IpAddr) -> u32 {
        self.release_host(&HostKey::new(vrf, addr))
    }

    pub(crate) fn release_host(&mut self, key: &HostKey) -> u32 {
        match self.hosts.release(key) {
            Released::Missing => panic!("dereferencing unknown host {}", key),
            Released::Retained(refs) => refs,
            Released::Removed(host) => {
                debug!("Destroying host entry {}", key);
                self.destroy_host(host);
                0
            }
        }
    }

    pub fn get_host_if(&self, vrf: Vrf, addr: IpAddr) -> Option<&HostEntry> {
        self.hosts.get(&HostKey::new(vrf, addr))
    }

    pub fn get_host(&self, vrf: Vrf, addr: IpAddr) -> Result<&HostEntry> {
        self.get_host_if(vrf, addr)
            .ok_or(FibSyncError::HostNotFound { vrf, addr })
    }

    pub fn host_ref_count(&self, vrf: Vrf, addr: IpAddr) -> u32 {
        self.hosts.ref_count(&HostKey::new(vrf, addr))
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    // ECMP groups

    /// Takes a reference on the group for `nexthops`, building it on first
    /// use. A failed build leaves no entry behind.
    pub fn inc_ref_or_create_ecmp_host(
        &mut self,
        vrf: Vrf,
        nexthops: &NextHopSet,
    ) -> Result<&EcmpGroup> {
        let key = EcmpKey::new(vrf, nexthops.clone());
        if self.ecmp_hosts.contains_key(&key) {
            let Some(group) = self.ecmp_hosts.increment_ref(&key) else {
                unreachable!("ecmp host {} vanished", key);
            };
            return Ok(group);
        }
        let group = self.create_ecmp_group(&key, HwLockState::Held)?;
        Ok(self.ecmp_hosts.insert_new(key, group))
    }

    /// # Panics
    ///
    /// If the group is not registered.
    pub fn deref_ecmp_host(&mut self, vrf: Vrf, nexthops: &NextHopSet) -> u32 {
        let key = EcmpKey::new(vrf, nexthops.clone());
        match self.ecmp_hosts.release(&key) {
            Released::Missing => panic!("dereferencing unknown ecmp host {}", key),
            Released::Retained(refs) => refs,
            Released::Removed(group) => {
                debug!("Destroying ecmp host {}", key);
                self.destroy_ecmp_group(group);
                0
            }
        }
    }

    pub fn get_ecmp_host_if(&self, vrf: Vrf, nexthops: &NextHopSet) -> Option<&EcmpGroup> {
        self.ecmp_hosts.get(&EcmpKey::new(vrf, nexthops.clone()))
    }

    pub fn get_ecmp_host(&self, vrf: Vrf, nexthops: &NextHopSet) -> Result<&EcmpGroup> {
        self.get_ecmp_host_if(vrf, nexthops)
            .ok_or_else(|| FibSyncError::EcmpHostNotFound {
                vrf,
                nexthops: nexthops.to_string(),
            })
    }

    pub fn ecmp_host_ref_count(&self, vrf: Vrf, nexthops: &NextHopSet) -> u32 {
        self.ecmp_hosts.ref_count(&EcmpKey::new(vrf, nexthops.clone()))
    }

    pub fn ecmp_host_count(&self) -> usize {
        self.ecmp_hosts.len()
    }

    // Egress objects

    pub fn get_egress(&self, id: EgressId) -> Option<&EgressObject> {
        self.egress.get(&id)
    }

    pub fn egress_ref_count(&self, id: EgressId) -> u32 {
        self.egress.ref_count(&id)
    }

    pub fn egress_count(&self) -> usize {
        self.egress.len()
    }

    /// Registers a freshly programmed egress object with one reference.
    ///
    /// # Panics
    ///
    /// If `id` is already registered.
    pub(crate) fn insert_egress(&mut self, id: EgressId, object: EgressObject) {
        self.egress.insert_new(id, object);
    }

    /// # Panics
    ///
    /// If `id` is neither a fixed id nor a registered egress object.
    pub(crate) fn inc_egress_ref(&mut self, id: EgressId) {
        if self.ctx.is_fixed_egress(id) {
            return;
        }
        if self.egress.increment_ref(&id).is_none() {
            panic!("reference to unknown egress object {}", id);
        }
    }

    /// Drops one reference on an egress object, destroying it in hardware
    /// with the last one. Destroy failures are logged.
    ///
    /// # Panics
    ///
    /// If `id` is neither a fixed id nor a registered egress object.
    pub(crate) fn deref_egress(&mut self, id: EgressId) {
        if self.ctx.is_fixed_egress(id) {
            return;
        }
        match self.egress.release(&id) {
            Released::Missing => panic!("dereferencing unknown egress object {}", id),
            Released::Retained(_) => {}
            Released::Removed(object) => egress::destroy(&self.ctx, id, &object),
        }
    }

    // Port mapping and link state

    /// The port `egress` currently forwards out of.
    pub fn egress_id_port(&self, egress: EgressId) -> Option<PortId> {
        self.egress_to_port.get(&egress).copied()
    }

    /// Shared handle to the port index, readable without the table.
    pub fn port_egress_index(&self) -> Arc<PortEgressIndex> {
        Arc::clone(&self.port_egress)
    }

    /// Moves `egress` from `old_port` to `new_port` and republishes the
    /// port index.
    ///
    /// An egress gaining its first port has just resolved and is re-added to
    /// every multipath group configured with it; one losing its port is
    /// taken out of them.
    pub fn update_port_egress_mapping(
        &mut self,
        egress: EgressId,
        old_port: Option<PortId>,
        new_port: Option<PortId>,
        lock: HwLockState,
    ) {
        if old_port == new_port {
            return;
        }
        let ctx = Arc::clone(&self.ctx);
        ctx.run_locked(lock, || {
            if old_port.is_some() {
                self.egress_to_port.remove(&egress);
            }
            if let Some(port) = new_port {
                self.egress_to_port.insert(egress, port);
            }
            self.port_egress.publish_move(egress, old_port, new_port);

            let came_up = old_port.is_none() && new_port.is_some();
            let went_down = old_port.is_some() && new_port.is_none();
            if came_up || went_down {
                let affected = BTreeSet::from([egress]);
                self.egress_resolution_changed(&affected, came_up, HwLockState::Held);
            }
        });
    }

    /// Propagates a port's link state to every multipath group with an egress
    /// id resolving through it.
    pub fn link_state_changed(&self, port: PortId, up: bool, lock: HwLockState) {
        let affected = self.port_egress.egress_ids(port);
        if affected.is_empty() {
            return;
        }
        debug!(
            "Link {} on {}, {} egress ids affected",
            if up { "up" } else { "down" },
            port,
            affected.len()
        );
        self.egress_resolution_changed(&affected, up, lock);
    }

    /// Adds (`up`) or removes the `affected` paths from every live multipath
    /// group and every group still only known from the warm-boot cache.
    pub fn egress_resolution_changed(&self, affected: &BTreeSet<EgressId>, up: bool, lock: HwLockState) {
        self.ctx.run_locked(lock, || {
            for group in self.ecmp_hosts.values() {
                let Some(ecmp) = group.ecmp_egress_id else {
                    continue;
                };
                let configured = match self.egress.get(&ecmp).and_then(EgressObject::as_multipath) {
                    Some(multipath) => &multipath.paths,
                    None => panic!("ecmp host [{}] has no multipath egress {}", group.nexthops, ecmp),
                };
                for path in affected {
                    self.update_ecmp_member(ecmp, configured, *path, up);
                }
            }

            // Before FIB sync some groups exist only in hardware; after it
            // this list is empty.
            let cached = self.ctx.warm_boot().ecmp_to_egress_ids();
            for (ecmp, configured) in &cached {
                for path in affected {
                    self.update_ecmp_member(*ecmp, configured, *path, up);
                }
            }
        });
    }

    fn update_ecmp_member(&self, ecmp: EgressId, configured: &BTreeSet<EgressId>, path: EgressId, up: bool) {
        let res = if up {
            egress::add_path_checked(&self.ctx, ecmp, configured, path)
        } else {
            egress::remove_path_checked(&self.ctx, ecmp, path)
        };
        if let Err(e) = res {
            error!(
                "Failed to {} {} in ecmp {}: {}",
                if up { "add" } else { "remove" },
                path,
                ecmp,
                e
            );
        }
    }

    /// Replays link state for every port once warm-boot host programming is
    /// done, since ports may have changed state while nothing was listening.
    pub fn warm_boot_host_entries_synced(&self) -> Result<()> {
        let ports = self
            .ctx
            .asic()
            .port_states()
            .hw_context(|| "read port states")?;
        info!(
            "Warm boot host entries synced, replaying link state for {} ports",
            ports.len()
        );
        for (port, up) in ports {
            self.link_state_changed(port, up, HwLockState::Held);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformConfig;
    use crate::nexthop::NextHop;
    use crate::warm_boot::{CachedEcmp, WarmBootCache, WarmBootSnapshot};
    use pretty_assertions::assert_eq;
    use sonic_asic::{EgressAction, InterfaceId, MacAddress, SimAsic, SimOp, SIM_DROP_EGRESS_ID};
    use std::net::Ipv4Addr;

    const VRF: Vrf = Vrf(0);

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([2, 0, 0, 0, 0, last])
    }

    fn nexthops(lasts: &[u8]) -> NextHopSet {
        lasts
            .iter()
            .map(|last| NextHop::new(InterfaceId(1), ip(*last)))
            .collect()
    }

    fn setup_with(cache: WarmBootCache) -> (Arc<SimAsic>, HostTable) {
        let asic = Arc::new(SimAsic::new());
        let ctx = HwContext::new(asic.clone(), PlatformConfig::default(), cache);
        (asic, HostTable::new(ctx))
    }

    fn setup() -> (Arc<SimAsic>, HostTable) {
        setup_with(WarmBootCache::cold())
    }

    fn resolve(table: &mut HostTable, last: u8, port: u32) {
        table
            .program_host(
                &HostKey::new(VRF, ip(last)),
                InterfaceId(1),
                EgressAction::Forward {
                    mac: mac(last),
                    port: PortId(port),
                },
                HwLockState::Held,
            )
            .unwrap();
    }

    #[test]
    fn test_host_refcount_lifecycle() {
        let (asic, mut table) = setup();
        let ctx = Arc::clone(table.context());
        let _hw = ctx.lock();

        table.inc_ref_or_create_host(VRF, ip(1));
        table.inc_ref_or_create_host(VRF, ip(1));
        assert_eq!(table.host_ref_count(VRF, ip(1)), 2);
        assert!(!table.get_host(VRF, ip(1)).unwrap().is_programmed());

        resolve(&mut table, 1, 5);
        let egress = table.get_host(VRF, ip(1)).unwrap().egress_id().unwrap();
        assert_eq!(table.egress_id_port(egress), Some(PortId(5)));
        assert_eq!(asic.host_count(), 1);

        assert_eq!(table.deref_host(VRF, ip(1)), 1);
        assert_eq!(table.deref_host(VRF, ip(1)), 0);
        assert!(matches!(
            table.get_host(VRF, ip(1)),
            Err(FibSyncError::HostNotFound { .. })
        ));
        assert_eq!(asic.host_count(), 0);
        assert_eq!(asic.egress_count(), 0);
        assert_eq!(table.egress_count(), 0);
        assert!(table.port_egress_index().snapshot().is_empty());
    }

    #[test]
    #[should_panic(expected = "dereferencing unknown host")]
    fn test_deref_unknown_host_is_fatal() {
        let (_asic, mut table) = setup();
        table.deref_host(VRF, ip(9));
    }

    #[test]
    fn test_reprogram_same_neighbor_is_noop() {
        let (asic, mut table) = setup();
        let ctx = Arc::clone(table.context());
        let _hw = ctx.lock();

        table.inc_ref_or_create_host(VRF, ip(1));
        resolve(&mut table, 1, 5);
        let writes = asic.write_count();
        resolve(&mut table, 1, 5);
        assert_eq!(asic.write_count(), writes);
    }

    #[test]
    fn test_ecmp_group_shares_hosts() {
        let (asic, mut table) = setup();
        let ctx = Arc::clone(table.context());
        let _hw = ctx.lock();

        let two = nexthops(&[1, 2]);
        let group = table.inc_ref_or_create_ecmp_host(VRF, &two).unwrap().clone();
        let ecmp = group.ecmp_egress_id().unwrap();
        assert_eq!(group.egress_id(), ecmp);
        assert_eq!(asic.ecmp(ecmp).map(|m| m.len()), Some(2));

        // unresolved members punt to CPU
        let host = table.get_host(VRF, ip(1)).unwrap();
        let row = asic.egress(host.egress_id().unwrap()).unwrap();
        assert_eq!(row.action, EgressAction::ToCpu);

        let single = nexthops(&[1]);
        let single_group = table.inc_ref_or_create_ecmp_host(VRF, &single).unwrap().clone();
        assert_eq!(single_group.ecmp_egress_id(), None);
        assert_eq!(Some(single_group.egress_id()), host_egress(&table, 1));
        assert_eq!(table.host_ref_count(VRF, ip(1)), 2);

        assert_eq!(table.deref_ecmp_host(VRF, &two), 0);
        assert_eq!(asic.ecmp_count(), 0);
        assert_eq!(table.host_ref_count(VRF, ip(1)), 1);
        assert_eq!(table.host_ref_count(VRF, ip(2)), 0);

        assert_eq!(table.deref_ecmp_host(VRF, &single), 0);
        assert_eq!(table.host_count(), 0);
        assert_eq!(asic.egress_count(), 0);
    }

    fn host_egress(table: &HostTable, last: u8) -> Option<EgressId> {
        table.get_host_if(VRF, ip(last)).and_then(HostEntry::egress_id)
    }

    #[test]
    fn test_ecmp_build_failure_releases_acquired_hosts() {
        let (asic, mut table) = setup();
        let ctx = Arc::clone(table.context());
        let _hw = ctx.lock();

        table.inc_ref_or_create_host(VRF, ip(1));
        resolve(&mut table, 1, 1);

        asic.fail_next(SimOp::EcmpCreate);
        let err = table
            .inc_ref_or_create_ecmp_host(VRF, &nexthops(&[1, 2, 3]))
            .unwrap_err();
        assert!(matches!(err, FibSyncError::Hardware { .. }));

        assert_eq!(table.ecmp_host_count(), 0);
        assert_eq!(table.host_ref_count(VRF, ip(1)), 1);
        assert_eq!(table.get_host_if(VRF, ip(2)), None);
        assert_eq!(table.get_host_if(VRF, ip(3)), None);
        assert_eq!(asic.host_count(), 1);
    }

    #[test]
    fn test_link_down_and_up_updates_ecmp_members() {
        let (asic, mut table) = setup();
        let ctx = Arc::clone(table.context());
        let _hw = ctx.lock();

        let two = nexthops(&[1, 2]);
        let ecmp = table
            .inc_ref_or_create_ecmp_host(VRF, &two)
            .unwrap()
            .ecmp_egress_id()
            .unwrap();
        resolve(&mut table, 1, 1);
        resolve(&mut table, 2, 2);
        let a = host_egress(&table, 1).unwrap();
        let b = host_egress(&table, 2).unwrap();

        table.link_state_changed(PortId(1), false, HwLockState::Held);
        assert_eq!(asic.ecmp(ecmp), Some(BTreeSet::from([b])));

        table.link_state_changed(PortId(1), true, HwLockState::Held);
        assert_eq!(asic.ecmp(ecmp), Some(BTreeSet::from([a, b])));

        // a port with no egress ids is a no-op
        let writes = asic.write_count();
        table.link_state_changed(PortId(9), false, HwLockState::Held);
        assert_eq!(asic.write_count(), writes);
    }

    #[test]
    fn test_link_state_not_held_takes_lock() {
        let (asic, mut table) = setup();
        let ctx = Arc::clone(table.context());
        let ecmp = {
            let _hw = ctx.lock();
            let ecmp = table
                .inc_ref_or_create_ecmp_host(VRF, &nexthops(&[1, 2]))
                .unwrap()
                .ecmp_egress_id()
                .unwrap();
            resolve(&mut table, 1, 1);
            resolve(&mut table, 2, 2);
            ecmp
        };

        table.link_state_changed(PortId(2), false, HwLockState::NotHeld);
        assert!(!ctx.is_locked());
        assert_eq!(asic.ecmp(ecmp).map(|m| m.len()), Some(1));
    }

    #[test]
    fn test_unresolve_removes_from_groups() {
        let (asic, mut table) = setup();
        let ctx = Arc::clone(table.context());
        let _hw = ctx.lock();

        let ecmp = table
            .inc_ref_or_create_ecmp_host(VRF, &nexthops(&[1, 2]))
            .unwrap()
            .ecmp_egress_id()
            .unwrap();
        resolve(&mut table, 1, 1);
        resolve(&mut table, 2, 2);

        table
            .program_host(&HostKey::new(VRF, ip(1)), InterfaceId(1), EgressAction::ToCpu, HwLockState::Held)
            .unwrap();
        let b = host_egress(&table, 2).unwrap();
        assert_eq!(asic.ecmp(ecmp), Some(BTreeSet::from([b])));
    }

    #[test]
    fn test_link_state_reaches_warm_boot_groups() {
        let snapshot = WarmBootSnapshot {
            ecmps: vec![CachedEcmp {
                id: EgressId(100_090),
                paths: BTreeSet::from([EgressId(100_002), EgressId(100_091)]),
            }],
            ..Default::default()
        };
        let (asic, mut table) = setup_with(WarmBootCache::from_snapshot(&snapshot));
        asic.preload_egress(
            EgressId(100_091),
            sonic_asic::L3EgressRow::to_cpu(InterfaceId(1)),
        );
        asic.preload_ecmp(EgressId(100_090), [EgressId(100_091)]);
        let ctx = Arc::clone(table.context());
        let _hw = ctx.lock();

        // a live egress that the cached group was never configured with
        table.inc_ref_or_create_host(VRF, ip(1));
        resolve(&mut table, 1, 4);
        let a = host_egress(&table, 1).unwrap();
        table.egress_resolution_changed(&BTreeSet::from([a]), true, HwLockState::Held);
        assert_eq!(asic.ecmp(EgressId(100_090)), Some(BTreeSet::from([EgressId(100_091)])));

        let cached_member = BTreeSet::from([EgressId(100_091)]);
        table.egress_resolution_changed(&cached_member, false, HwLockState::Held);
        assert_eq!(asic.ecmp(EgressId(100_090)), Some(BTreeSet::new()));
        table.egress_resolution_changed(&cached_member, true, HwLockState::Held);
        assert_eq!(asic.ecmp(EgressId(100_090)), Some(cached_member));
    }

    #[test]
    fn test_host_with_egress_holds_reference() {
        let (_asic, mut table) = setup();
        let ctx = Arc::clone(table.context());
        let _hw = ctx.lock();

        table.inc_ref_or_create_host(VRF, ip(1));
        resolve(&mut table, 1, 1);
        let egress = host_egress(&table, 1).unwrap();
        assert_eq!(table.egress_ref_count(egress), 1);

        let host_route = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1));
        table.inc_ref_or_create_host_with_egress(VRF, host_route, egress);
        assert_eq!(table.egress_ref_count(egress), 2);

        table.deref_host(VRF, ip(1));
        assert_eq!(table.egress_ref_count(egress), 1);
        table.deref_host(VRF, host_route);
        assert_eq!(table.egress_ref_count(egress), 0);
    }

    #[test]
    fn test_fixed_egress_not_counted() {
        let (_asic, mut table) = setup();
        let ctx = Arc::clone(table.context());
        let _hw = ctx.lock();

        table.inc_ref_or_create_host_with_egress(VRF, ip(7), SIM_DROP_EGRESS_ID);
        assert_eq!(table.egress_ref_count(SIM_DROP_EGRESS_ID), 0);
        assert_eq!(table.deref_host(VRF, ip(7)), 0);
    }

    #[test]
    fn test_warm_boot_host_entries_synced_replays_ports() {
        let (asic, mut table) = setup();
        let ctx = Arc::clone(table.context());
        let _hw = ctx.lock();

        let ecmp = table
            .inc_ref_or_create_ecmp_host(VRF, &nexthops(&[1, 2]))
            .unwrap()
            .ecmp_egress_id()
            .unwrap();
        resolve(&mut table, 1, 1);
        resolve(&mut table, 2, 2);
        asic.set_port_state(PortId(1), true);
        asic.set_port_state(PortId(2), false);

        table.warm_boot_host_entries_synced().unwrap();
        assert_eq!(asic.ecmp(ecmp), Some(BTreeSet::from([host_egress(&table, 1).unwrap()])));
    }
}
