//! Hardware state found at startup.
//!
//! After a restart the chip still holds the egress objects, multipath groups,
//! host rows and routes the previous process programmed. The cache exposes
//! them so that new programming can be compared against what is already
//! there and skipped when equivalent. Each entry is removed once something
//! claims it; whatever is left when routing has converged is stale and gets
//! purged by the owner of the cache.

use crate::error::{FibSyncError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sonic_asic::{EgressId, IpPrefix, L3EgressRow, L3HostRow, L3RouteRow, PortId, Vrf};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::net::IpAddr;
use std::path::Path;

/// A unicast egress object recorded with the next-hop it was created for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEgress {
    pub id: EgressId,
    pub vrf: Vrf,
    pub addr: IpAddr,
    #[serde(flatten)]
    pub row: L3EgressRow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEcmp {
    pub id: EgressId,
    /// The configured path set. Members on down ports may be missing from
    /// hardware.
    pub paths: BTreeSet<EgressId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortLinkState {
    pub port: PortId,
    pub up: bool,
}

/// Serialized form of the hardware tables at restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmBootSnapshot {
    #[serde(default)]
    pub egresses: Vec<CachedEgress>,
    #[serde(default)]
    pub ecmps: Vec<CachedEcmp>,
    #[serde(default)]
    pub hosts: Vec<L3HostRow>,
    #[serde(default)]
    pub routes: Vec<L3RouteRow>,
    #[serde(default)]
    pub ports: Vec<PortLinkState>,
}

impl WarmBootSnapshot {
    /// Reads a JSON snapshot written at shutdown.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let snapshot: Self = serde_json::from_str(&content).map_err(|e| {
            FibSyncError::Config(format!("failed to parse snapshot {}: {}", path.display(), e))
        })?;
        info!("Loaded warm boot snapshot from {}", path.display());
        Ok(snapshot)
    }
}

/// Entries no one claimed by the time routing converged.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StaleEntries {
    pub routes: Vec<L3RouteRow>,
    pub hosts: Vec<L3HostRow>,
    pub ecmps: Vec<CachedEcmp>,
    pub egresses: Vec<EgressId>,
}

impl StaleEntries {
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
            && self.hosts.is_empty()
            && self.ecmps.is_empty()
            && self.egresses.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct WarmBootCache {
    active: bool,
    egresses: BTreeMap<(Vrf, IpAddr), (EgressId, L3EgressRow)>,
    ecmps: BTreeMap<EgressId, BTreeSet<EgressId>>,
    hosts: BTreeMap<(Vrf, IpAddr), L3HostRow>,
    routes: BTreeMap<(Vrf, IpPrefix), L3RouteRow>,
}

impl WarmBootCache {
    /// An empty cache for a cold start; every lookup misses.
    pub fn cold() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: &WarmBootSnapshot) -> Self {
        let cache = Self {
            active: true,
            egresses: snapshot
                .egresses
                .iter()
                .map(|e| ((e.vrf, e.addr), (e.id, e.row)))
                .collect(),
            ecmps: snapshot
                .ecmps
                .iter()
                .map(|e| (e.id, e.paths.clone()))
                .collect(),
            hosts: snapshot
                .hosts
                .iter()
                .map(|h| ((h.vrf, h.addr), *h))
                .collect(),
            routes: snapshot
                .routes
                .iter()
                .map(|r| ((r.vrf, r.prefix), *r))
                .collect(),
        };
        info!(
            "Warm boot cache loaded: {} egresses, {} ecmps, {} hosts, {} routes",
            cache.egresses.len(),
            cache.ecmps.len(),
            cache.hosts.len(),
            cache.routes.len()
        );
        cache
    }

    /// True between a warm start and the end of FIB sync.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn find_route(&self, vrf: Vrf, prefix: IpPrefix) -> Option<L3RouteRow> {
        self.routes.get(&(vrf, prefix)).copied()
    }

    pub fn find_host(&self, vrf: Vrf, addr: IpAddr) -> Option<L3HostRow> {
        self.hosts.get(&(vrf, addr)).copied()
    }

    pub fn find_egress(&self, vrf: Vrf, addr: IpAddr) -> Option<(EgressId, L3EgressRow)> {
        self.egresses.get(&(vrf, addr)).copied()
    }

    /// Finds a multipath object configured over exactly `paths`.
    pub fn find_ecmp(&self, paths: &BTreeSet<EgressId>) -> Option<EgressId> {
        self.ecmps
            .iter()
            .find(|(_, cached)| *cached == paths)
            .map(|(id, _)| *id)
    }

    pub fn programmed_route(&mut self, vrf: Vrf, prefix: IpPrefix) {
        if self.routes.remove(&(vrf, prefix)).is_some() {
            debug!("Programmed route {} in {}, removing from warm boot cache", prefix, vrf);
        }
    }

    pub fn programmed_host(&mut self, vrf: Vrf, addr: IpAddr) {
        if self.hosts.remove(&(vrf, addr)).is_some() {
            debug!("Programmed host {} in {}, removing from warm boot cache", addr, vrf);
        }
    }

    pub fn programmed_egress(&mut self, vrf: Vrf, addr: IpAddr) {
        if let Some((id, _)) = self.egresses.remove(&(vrf, addr)) {
            debug!("Programmed {} for {}, removing from warm boot cache", id, addr);
        }
    }

    pub fn programmed_ecmp(&mut self, id: EgressId) {
        if self.ecmps.remove(&id).is_some() {
            debug!("Programmed ecmp {}, removing from warm boot cache", id);
        }
    }

    /// Multipath groups still only known from the cache, with their
    /// configured paths.
    pub fn ecmp_to_egress_ids(&self) -> Vec<(EgressId, BTreeSet<EgressId>)> {
        self.ecmps
            .iter()
            .map(|(id, paths)| (*id, paths.clone()))
            .collect()
    }

    /// Hands back every unclaimed entry and deactivates the cache.
    pub fn take_stale(&mut self) -> StaleEntries {
        let stale = StaleEntries {
            routes: std::mem::take(&mut self.routes).into_values().collect(),
            hosts: std::mem::take(&mut self.hosts).into_values().collect(),
            ecmps: std::mem::take(&mut self.ecmps)
                .into_iter()
                .map(|(id, paths)| CachedEcmp { id, paths })
                .collect(),
            egresses: std::mem::take(&mut self.egresses)
                .into_values()
                .map(|(id, _)| id)
                .collect(),
        };
        self.active = false;
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sonic_asic::InterfaceId;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn snapshot() -> WarmBootSnapshot {
        WarmBootSnapshot {
            egresses: vec![CachedEgress {
                id: EgressId(100_010),
                vrf: Vrf(0),
                addr: addr(1),
                row: L3EgressRow::to_cpu(InterfaceId(1)),
            }],
            ecmps: vec![CachedEcmp {
                id: EgressId(100_020),
                paths: [EgressId(100_010), EgressId(100_011)].into_iter().collect(),
            }],
            hosts: vec![L3HostRow::new(Vrf(0), addr(1), EgressId(100_010), false)],
            routes: vec![L3RouteRow::new(
                Vrf(0),
                "10.1.0.0/16".parse().unwrap(),
                EgressId(100_020),
                true,
            )],
            ports: vec![],
        }
    }

    #[test]
    fn test_cold_cache_misses() {
        let cache = WarmBootCache::cold();
        assert!(!cache.is_active());
        assert_eq!(cache.find_host(Vrf(0), addr(1)), None);
        assert!(cache.ecmp_to_egress_ids().is_empty());
    }

    #[test]
    fn test_programmed_removes_entries() {
        let mut cache = WarmBootCache::from_snapshot(&snapshot());
        assert!(cache.is_active());
        assert_eq!(cache.find_egress(Vrf(0), addr(1)).map(|(id, _)| id), Some(EgressId(100_010)));

        cache.programmed_host(Vrf(0), addr(1));
        assert_eq!(cache.find_host(Vrf(0), addr(1)), None);

        let paths = [EgressId(100_011), EgressId(100_010)].into_iter().collect();
        assert_eq!(cache.find_ecmp(&paths), Some(EgressId(100_020)));
        cache.programmed_ecmp(EgressId(100_020));
        assert_eq!(cache.find_ecmp(&paths), None);
    }

    #[test]
    fn test_take_stale_deactivates() {
        let mut cache = WarmBootCache::from_snapshot(&snapshot());
        cache.programmed_egress(Vrf(0), addr(1));

        let stale = cache.take_stale();
        assert_eq!(stale.routes.len(), 1);
        assert_eq!(stale.hosts.len(), 1);
        assert_eq!(stale.ecmps.len(), 1);
        assert!(stale.egresses.is_empty());
        assert!(!cache.is_active());
        assert!(cache.take_stale().is_empty());
    }

    #[test]
    fn test_snapshot_json() {
        let json = serde_json::to_string(&snapshot()).unwrap();
        let back: WarmBootSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot());

        let empty: WarmBootSnapshot = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, WarmBootSnapshot::default());
    }

    #[test]
    fn test_load_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, serde_json::to_string_pretty(&snapshot()).unwrap()).unwrap();
        assert_eq!(WarmBootSnapshot::load(&path).unwrap(), snapshot());

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            WarmBootSnapshot::load(&path),
            Err(FibSyncError::Config(_))
        ));
        assert!(matches!(
            WarmBootSnapshot::load(dir.path().join("missing.json")),
            Err(FibSyncError::Io(_))
        ));
    }
}
