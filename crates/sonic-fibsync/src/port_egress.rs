//! Port to egress-id reverse index.
//!
//! Link-state notifications arrive on their own thread and need to know
//! which egress objects resolve through a port without waiting on the table
//! lock. The index is an immutable map published through an `ArcSwap`:
//! writers clone, modify and store a new map; readers load whichever map is
//! current and never observe a half-applied move.

use arc_swap::ArcSwap;
use sonic_asic::{EgressId, PortId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One published version of the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortEgressMap {
    ports: BTreeMap<PortId, BTreeSet<EgressId>>,
}

impl PortEgressMap {
    pub fn egress_ids(&self, port: PortId) -> Option<&BTreeSet<EgressId>> {
        self.ports.get(&port)
    }

    pub fn ports(&self) -> impl Iterator<Item = &PortId> {
        self.ports.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Returns a copy with `egress` moved from `old_port` to `new_port`.
    /// Ports left without egress ids are dropped.
    fn with_moved(&self, egress: EgressId, old_port: Option<PortId>, new_port: Option<PortId>) -> Self {
        let mut next = self.clone();
        if let Some(old) = old_port {
            if let Some(ids) = next.ports.get_mut(&old) {
                ids.remove(&egress);
                if ids.is_empty() {
                    next.ports.remove(&old);
                }
            }
        }
        if let Some(new) = new_port {
            next.ports.entry(new).or_default().insert(egress);
        }
        next
    }
}

/// The shared, atomically replaced index.
#[derive(Debug, Default)]
pub struct PortEgressIndex {
    current: ArcSwap<PortEgressMap>,
}

impl PortEgressIndex {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(PortEgressMap::default()),
        }
    }

    /// The currently published map.
    pub fn snapshot(&self) -> Arc<PortEgressMap> {
        self.current.load_full()
    }

    /// Egress ids resolving through `port`, read without locking.
    pub fn egress_ids(&self, port: PortId) -> BTreeSet<EgressId> {
        self.current
            .load()
            .egress_ids(port)
            .cloned()
            .unwrap_or_default()
    }

    /// Publishes a new map with `egress` moved between ports.
    ///
    /// Writers are serialized by the hardware lock; this is not a
    /// compare-and-swap.
    pub fn publish_move(&self, egress: EgressId, old_port: Option<PortId>, new_port: Option<PortId>) {
        let next = self.current.load().with_moved(egress, old_port, new_port);
        self.current.store(Arc::new(next));
    }
}
