//! Scripted route, neighbor and link events.
//!
//! A script is a JSON array of events, each tagged with `op`. The daemon
//! replays one against a simulated ASIC; tests use it to drive scenarios
//! end to end.

use crate::context::HwLockState;
use crate::error::{FibSyncError, Result};
use crate::fib_sync::FibSync;
use crate::nexthop::RouteForwardInfo;
use crate::route_table::Route;
use log::{error, info};
use serde::{Deserialize, Serialize};
use sonic_asic::{InterfaceId, IpPrefix, MacAddress, PortId, Vrf};
use std::fs;
use std::net::IpAddr;
use std::path::Path;

fn default_vrf() -> Vrf {
    Vrf(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FibEvent {
    AddRoute {
        #[serde(default = "default_vrf")]
        vrf: Vrf,
        prefix: IpPrefix,
        forward: RouteForwardInfo,
    },
    DeleteRoute {
        #[serde(default = "default_vrf")]
        vrf: Vrf,
        prefix: IpPrefix,
    },
    Neighbor {
        #[serde(default = "default_vrf")]
        vrf: Vrf,
        addr: IpAddr,
        intf: InterfaceId,
        mac: MacAddress,
        port: PortId,
    },
    Pending {
        #[serde(default = "default_vrf")]
        vrf: Vrf,
        addr: IpAddr,
        intf: InterfaceId,
    },
    Flush {
        #[serde(default = "default_vrf")]
        vrf: Vrf,
        addr: IpAddr,
    },
    Link {
        port: PortId,
        up: bool,
    },
    HostsSynced,
    FibSynced,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub applied: usize,
    pub failed: usize,
}

pub fn load_script(path: impl AsRef<Path>) -> Result<Vec<FibEvent>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| FibSyncError::Config(format!("failed to parse script {}: {}", path.display(), e)))
}

/// Applies one event.
pub fn apply(fib: &FibSync, event: &FibEvent) -> Result<()> {
    match event {
        FibEvent::AddRoute {
            vrf,
            prefix,
            forward,
        } => match prefix.network() {
            IpAddr::V4(network) => fib.add_route(*vrf, &Route::new(network, prefix.len(), forward.clone())),
            IpAddr::V6(network) => fib.add_route(*vrf, &Route::new(network, prefix.len(), forward.clone())),
        },
        FibEvent::DeleteRoute { vrf, prefix } => match prefix.network() {
            IpAddr::V4(network) => fib.delete_route(*vrf, network, prefix.len()),
            IpAddr::V6(network) => fib.delete_route(*vrf, network, prefix.len()),
        },
        FibEvent::Neighbor {
            vrf,
            addr,
            intf,
            mac,
            port,
        } => fib.update_neighbor_entry(*vrf, *addr, *intf, *mac, *port),
        FibEvent::Pending { vrf, addr, intf } => fib.set_pending_entry(*vrf, *addr, *intf),
        FibEvent::Flush { vrf, addr } => fib.perform_neighbor_flush(*vrf, *addr).map(|_| ()),
        FibEvent::Link { port, up } => {
            fib.link_state_changed(*port, *up, HwLockState::NotHeld);
            Ok(())
        }
        FibEvent::HostsSynced => fib.warm_boot_host_entries_synced(),
        FibEvent::FibSynced => {
            fib.fib_synced();
            Ok(())
        }
    }
}

/// Applies every event in order. A failed event is logged and skipped.
pub fn replay(fib: &FibSync, events: &[FibEvent]) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    for (idx, event) in events.iter().enumerate() {
        match apply(fib, event) {
            Ok(()) => summary.applied += 1,
            Err(e) => {
                error!("Event {} ({:?}) failed: {}", idx, event, e);
                summary.failed += 1;
            }
        }
    }
    info!(
        "Replayed {} events, {} failed",
        summary.applied + summary.failed,
        summary.failed
    );
    summary
}
