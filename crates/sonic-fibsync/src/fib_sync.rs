//! The entry point for the routing, neighbor and link-state collaborators.
//!
//! `FibSync` owns the host and route tables behind one mutex and the
//! hardware context with its hardware-wide lock. Every entry point takes
//! the hardware lock first and the table lock second, so a link-state
//! notification arriving on another thread either waits for a whole
//! routing update or runs entirely before it.

use crate::config::{FibSyncConfig, PlatformConfig};
use crate::context::{HwContext, HwLockState};
use crate::dump::FibDump;
use crate::error::{FibSyncError, Result};
use crate::host::HostKey;
use crate::host_table::HostTable;
use crate::port_egress::PortEgressIndex;
use crate::route_table::{AddressFamily, Route, RouteTable};
use crate::warm_boot::{StaleEntries, WarmBootCache, WarmBootSnapshot};
use log::{debug, info, warn};
use parking_lot::Mutex;
use sonic_asic::{AsicL3Api, EgressAction, InterfaceId, MacAddress, PortId, Vrf};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;

/// The tables guarded together.
pub struct FibTables {
    pub hosts: HostTable,
    pub routes: RouteTable,
    /// Hosts the neighbor collaborator holds a reference on.
    neighbors: BTreeSet<HostKey>,
}

impl FibTables {
    pub fn is_neighbor(&self, vrf: Vrf, addr: IpAddr) -> bool {
        self.neighbors.contains(&HostKey::new(vrf, addr))
    }
}

pub struct FibSync {
    ctx: Arc<HwContext>,
    tables: Mutex<FibTables>,
    port_egress: Arc<PortEgressIndex>,
}

impl FibSync {
    pub fn new(asic: Arc<dyn AsicL3Api>, platform: PlatformConfig, warm_boot: WarmBootCache) -> Self {
        let ctx = HwContext::new(asic, platform, warm_boot);
        let hosts = HostTable::new(Arc::clone(&ctx));
        let port_egress = hosts.port_egress_index();
        Self {
            tables: Mutex::new(FibTables {
                hosts,
                routes: RouteTable::new(Arc::clone(&ctx)),
                neighbors: BTreeSet::new(),
            }),
            ctx,
            port_egress,
        }
    }

    /// Builds from configuration. The snapshot is only used when the
    /// configuration asks for a warm boot.
    pub fn from_config(
        asic: Arc<dyn AsicL3Api>,
        config: &FibSyncConfig,
        snapshot: Option<&WarmBootSnapshot>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = match (config.warm_boot, snapshot) {
            (true, Some(snapshot)) => WarmBootCache::from_snapshot(snapshot),
            (true, None) => {
                return Err(FibSyncError::Config(
                    "warm boot requested without a snapshot".to_string(),
                ))
            }
            (false, _) => WarmBootCache::cold(),
        };
        Ok(Self::new(asic, config.platform.clone(), cache))
    }

    pub fn context(&self) -> &Arc<HwContext> {
        &self.ctx
    }

    /// Runs `f` with both locks held, for collaborators that drive the
    /// tables directly.
    pub fn with_tables<T>(&self, f: impl FnOnce(&mut FibTables) -> T) -> T {
        let _hw = self.ctx.lock();
        let mut tables = self.tables.lock();
        f(&mut tables)
    }

    // Routing

    pub fn add_route<A: AddressFamily>(&self, vrf: Vrf, route: &Route<A>) -> Result<()> {
        self.with_tables(|t| t.routes.add_route(&mut t.hosts, vrf, route))
    }

    pub fn delete_route<A: AddressFamily>(&self, vrf: Vrf, network: A, len: u8) -> Result<()> {
        self.with_tables(|t| t.routes.delete_route(&mut t.hosts, vrf, network, len))
    }

    // Neighbors

    /// Resolves `addr` to `mac` behind `port`. The first call for an address
    /// takes the neighbor's reference on the host.
    pub fn update_neighbor_entry(
        &self,
        vrf: Vrf,
        addr: IpAddr,
        intf: InterfaceId,
        mac: MacAddress,
        port: PortId,
    ) -> Result<()> {
        debug!("Neighbor {} in {} resolved to {} on {}", addr, vrf, mac, port);
        self.program_neighbor(vrf, addr, intf, EgressAction::Forward { mac, port })
    }

    /// Creates a placeholder for a neighbor being resolved. Traffic to it
    /// punts to the CPU until it resolves.
    pub fn set_pending_entry(&self, vrf: Vrf, addr: IpAddr, intf: InterfaceId) -> Result<()> {
        debug!("Neighbor {} in {} pending on {}", addr, vrf, intf);
        self.program_neighbor(vrf, addr, intf, EgressAction::ToCpu)
    }

    fn program_neighbor(&self, vrf: Vrf, addr: IpAddr, intf: InterfaceId, action: EgressAction) -> Result<()> {
        let key = HostKey::new(vrf, addr);
        self.with_tables(|t| {
            let created = t.neighbors.insert(key);
            if created {
                t.hosts.acquire_host(key, None);
            }
            let res = t.hosts.program_host(&key, intf, action, HwLockState::Held);
            if res.is_err() && created {
                t.neighbors.remove(&key);
                t.hosts.release_host(&key);
            }
            res
        })
    }

    /// Drops the neighbor's hold on `addr`. A host still used by routes is
    /// pointed back at the CPU first, unless its egress belongs to another
    /// next-hop. Returns the number of entries flushed.
    pub fn perform_neighbor_flush(&self, vrf: Vrf, addr: IpAddr) -> Result<u32> {
        let key = HostKey::new(vrf, addr);
        self.with_tables(|t| {
            if !t.neighbors.contains(&key) {
                debug!("No neighbor {} in {} to flush", addr, vrf);
                return Ok(0);
            }
            if t.hosts.host_ref_count(vrf, addr) > 1 && t.hosts.owns_egress(&key) {
                let intf = t.hosts.get_host(vrf, addr)?.intf();
                if let Some(intf) = intf {
                    t.hosts
                        .program_host(&key, intf, EgressAction::ToCpu, HwLockState::Held)?;
                }
            }
            t.neighbors.remove(&key);
            t.hosts.release_host(&key);
            debug!("Flushed neighbor {} in {}", addr, vrf);
            Ok(1)
        })
    }

    // Link state

    /// Propagates a link change to the multipath groups. Callable with or
    /// without the hardware lock.
    pub fn link_state_changed(&self, port: PortId, up: bool, lock: HwLockState) {
        if self.port_egress.egress_ids(port).is_empty() {
            debug!("Link change on {} affects no egress ids", port);
            return;
        }
        self.ctx.run_locked(lock, || {
            let tables = self.tables.lock();
            tables.hosts.link_state_changed(port, up, HwLockState::Held);
        });
    }

    /// Lock-free view of the port to egress-id index.
    pub fn port_egress_index(&self) -> Arc<PortEgressIndex> {
        Arc::clone(&self.port_egress)
    }

    // Warm boot

    pub fn warm_boot_host_entries_synced(&self) -> Result<()> {
        self.with_tables(|t| t.hosts.warm_boot_host_entries_synced())
    }

    /// Ends warm boot: removes everything left in the cache from hardware
    /// and returns what was removed. Removal failures are logged.
    pub fn fib_synced(&self) -> StaleEntries {
        let _hw = self.ctx.lock();
        let stale = self.ctx.warm_boot().take_stale();
        if stale.is_empty() {
            info!("FIB synced, no stale hardware entries");
            return stale;
        }
        info!(
            "FIB synced, purging {} routes, {} hosts, {} ecmps, {} egresses",
            stale.routes.len(),
            stale.hosts.len(),
            stale.ecmps.len(),
            stale.egresses.len()
        );
        let asic = self.ctx.asic();
        for route in &stale.routes {
            if let Err(e) = asic.route_delete(route.vrf, route.prefix) {
                warn!("Failed to purge route {} in {}: {}", route.prefix, route.vrf, e);
            }
        }
        for host in &stale.hosts {
            if let Err(e) = asic.host_delete(host.vrf, host.addr) {
                warn!("Failed to purge host {} in {}: {}", host.addr, host.vrf, e);
            }
        }
        for ecmp in &stale.ecmps {
            if let Err(e) = asic.ecmp_destroy(ecmp.id) {
                warn!("Failed to purge ecmp {}: {}", ecmp.id, e);
            }
        }
        for egress in &stale.egresses {
            if let Err(e) = asic.egress_destroy(*egress) {
                warn!("Failed to purge {}: {}", egress, e);
            }
        }
        stale
    }

    pub fn dump(&self) -> FibDump {
        let tables = self.tables.lock();
        FibDump {
            host_table: tables.hosts.dump(),
            routes: tables.routes.dump(),
            warm_boot_active: self.ctx.warm_boot().is_active(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nexthop::{NextHop, RouteForwardInfo};
    use crate::route_table::RouteV4;
    use pretty_assertions::assert_eq;
    use sonic_asic::{L3HostRow, SimAsic, SimOp};
    use std::net::Ipv4Addr;

    const VRF: Vrf = Vrf(0);

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([2, 0, 0, 0, 0, last])
    }

    fn setup() -> (Arc<SimAsic>, FibSync) {
        let asic = Arc::new(SimAsic::new());
        let fib = FibSync::new(asic.clone(), PlatformConfig::default(), WarmBootCache::cold());
        (asic, fib)
    }

    #[test]
    fn test_neighbor_resolve_and_flush() {
        let (asic, fib) = setup();
        fib.update_neighbor_entry(VRF, ip(1), InterfaceId(1), mac(1), PortId(3))
            .unwrap();
        assert!(fib.with_tables(|t| t.is_neighbor(VRF, ip(1))));
        assert_eq!(asic.host_count(), 1);
        assert_eq!(fib.port_egress_index().egress_ids(PortId(3)).len(), 1);

        assert_eq!(fib.perform_neighbor_flush(VRF, ip(1)).unwrap(), 1);
        assert_eq!(fib.perform_neighbor_flush(VRF, ip(1)).unwrap(), 0);
        assert_eq!(asic.host_count(), 0);
        assert_eq!(asic.egress_count(), 0);
        assert!(fib.port_egress_index().snapshot().is_empty());
    }

    #[test]
    fn test_flush_of_shared_host_punts_to_cpu() {
        let (asic, fib) = setup();
        fib.update_neighbor_entry(VRF, ip(1), InterfaceId(1), mac(1), PortId(3))
            .unwrap();
        let route = RouteV4::new(
            Ipv4Addr::new(10, 9, 0, 0),
            16,
            RouteForwardInfo::NextHops([NextHop::new(InterfaceId(1), ip(1))].into_iter().collect()),
        );
        fib.add_route(VRF, &route).unwrap();

        assert_eq!(fib.perform_neighbor_flush(VRF, ip(1)).unwrap(), 1);
        let egress = fib.with_tables(|t| {
            assert_eq!(t.hosts.host_ref_count(VRF, ip(1)), 1);
            t.hosts.get_host(VRF, ip(1)).unwrap().egress_id().unwrap()
        });
        assert_eq!(asic.egress(egress).map(|row| row.action), Some(EgressAction::ToCpu));
        assert!(fib.port_egress_index().egress_ids(PortId(3)).is_empty());
    }

    #[test]
    fn test_flush_leaves_borrowed_egress_alone() {
        let (asic, fib) = setup();
        fib.update_neighbor_entry(VRF, ip(1), InterfaceId(1), mac(1), PortId(3))
            .unwrap();
        let route = RouteV4::new(
            Ipv4Addr::new(10, 0, 0, 20),
            32,
            RouteForwardInfo::NextHops([NextHop::new(InterfaceId(1), ip(1))].into_iter().collect()),
        );
        fib.add_route(VRF, &route).unwrap();
        let key = HostKey::new(VRF, ip(20));
        let shared = fib.with_tables(|t| {
            assert!(!t.hosts.owns_egress(&key));
            assert!(t.hosts.owns_egress(&HostKey::new(VRF, ip(1))));
            // a neighbor hold on a host that forwards through another next-hop
            t.neighbors.insert(key);
            t.hosts.acquire_host(key, None);
            t.hosts.get_host(VRF, ip(20)).unwrap().egress_id().unwrap()
        });

        assert_eq!(fib.perform_neighbor_flush(VRF, ip(20)).unwrap(), 1);
        fib.with_tables(|t| {
            assert!(!t.is_neighbor(VRF, ip(20)));
            assert_eq!(t.hosts.host_ref_count(VRF, ip(20)), 1);
        });
        assert_eq!(
            asic.egress(shared),
            Some(sonic_asic::L3EgressRow::forward(InterfaceId(1), mac(1), PortId(3)))
        );
    }

    #[test]
    fn test_pending_then_resolved() {
        let (asic, fib) = setup();
        fib.set_pending_entry(VRF, ip(2), InterfaceId(1)).unwrap();
        let egress = fib.with_tables(|t| t.hosts.get_host(VRF, ip(2)).unwrap().egress_id().unwrap());
        assert_eq!(asic.egress(egress).map(|row| row.action), Some(EgressAction::ToCpu));

        fib.update_neighbor_entry(VRF, ip(2), InterfaceId(1), mac(2), PortId(4))
            .unwrap();
        assert_eq!(fib.with_tables(|t| t.hosts.host_ref_count(VRF, ip(2))), 1);
        assert_eq!(asic.egress(egress).and_then(|row| row.port()), Some(PortId(4)));
    }

    #[test]
    fn test_failed_first_neighbor_update_leaves_nothing() {
        let (asic, fib) = setup();
        asic.fail_next(SimOp::HostAdd);
        assert!(fib
            .update_neighbor_entry(VRF, ip(1), InterfaceId(1), mac(1), PortId(3))
            .is_err());
        assert!(!fib.with_tables(|t| t.is_neighbor(VRF, ip(1))));
        assert_eq!(fib.with_tables(|t| t.hosts.host_count()), 0);
        assert_eq!(asic.egress_count(), 0);
    }

    #[test]
    fn test_link_state_without_lock() {
        let (asic, fib) = setup();
        fib.update_neighbor_entry(VRF, ip(1), InterfaceId(1), mac(1), PortId(1))
            .unwrap();
        fib.update_neighbor_entry(VRF, ip(2), InterfaceId(1), mac(2), PortId(2))
            .unwrap();
        let route = RouteV4::new(
            Ipv4Addr::new(10, 8, 0, 0),
            16,
            RouteForwardInfo::NextHops(
                [NextHop::new(InterfaceId(1), ip(1)), NextHop::new(InterfaceId(1), ip(2))]
                    .into_iter()
                    .collect(),
            ),
        );
        fib.add_route(VRF, &route).unwrap();
        let ecmp = fib.with_tables(|t| {
            t.routes
                .get_route(VRF, "10.8.0.0/16".parse().unwrap())
                .unwrap()
                .egress_id()
                .unwrap()
        });

        fib.link_state_changed(PortId(1), false, HwLockState::NotHeld);
        assert_eq!(asic.ecmp(ecmp).map(|m| m.len()), Some(1));
        {
            let _hw = fib.context().lock();
            fib.link_state_changed(PortId(1), true, HwLockState::Held);
        }
        assert_eq!(asic.ecmp(ecmp).map(|m| m.len()), Some(2));
    }

    #[test]
    fn test_fib_synced_purges_unclaimed_entries() {
        let stale_host = L3HostRow::new(VRF, ip(50), sonic_asic::SIM_DROP_EGRESS_ID, false);
        let snapshot = WarmBootSnapshot {
            hosts: vec![stale_host],
            ..Default::default()
        };
        let asic = Arc::new(SimAsic::new());
        asic.preload_host(stale_host);
        let fib = FibSync::new(
            asic.clone(),
            PlatformConfig::default(),
            WarmBootCache::from_snapshot(&snapshot),
        );
        assert!(fib.dump().warm_boot_active);

        let stale = fib.fib_synced();
        assert_eq!(stale.hosts, vec![stale_host]);
        assert_eq!(asic.host_count(), 0);
        assert!(!fib.dump().warm_boot_active);
        assert!(fib.fib_synced().is_empty());
    }

    #[test]
    fn test_from_config_requires_snapshot_for_warm_boot() {
        let asic = Arc::new(SimAsic::new());
        let config = FibSyncConfig {
            warm_boot: true,
            ..Default::default()
        };
        assert!(matches!(
            FibSync::from_config(asic, &config, None),
            Err(FibSyncError::Config(_))
        ));
    }
}
