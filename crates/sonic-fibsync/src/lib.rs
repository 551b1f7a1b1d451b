//! Forwarding-state synchronization for a switch ASIC's L3 tables.
//!
//! Routes from the routing layer and neighbors from the neighbor layer are
//! translated into shared, reference-counted hardware objects:
//!
//! - [`EgressObject`]: a unicast forwarding action, or a multipath object
//!   over other egress ids
//! - [`HostEntry`]: an exact-match row for one (VRF, IP)
//! - [`EcmpGroup`]: the forwarding state shared by all routes with the same
//!   next-hop set
//! - [`RouteEntry`]: one (VRF, prefix), programmed as an LPM row or, for
//!   full-length prefixes, folded into the host table
//!
//! [`HostTable`] and [`RouteTable`] own these objects and destroy each one
//! when its last reference goes away. [`FibSync`] puts both tables behind
//! the hardware lock and is what collaborators call.
//!
//! After a restart, programming is reconciled against a [`WarmBootCache`]
//! of what the hardware already holds: equivalent entries are adopted
//! without rewriting them, and whatever is left unclaimed once routing has
//! converged is purged by [`FibSync::fib_synced`].
//!
//! # Example
//!
//! ```
//! use sonic_asic::{SimAsic, Vrf};
//! use sonic_fibsync::{FibSync, PlatformConfig, RouteForwardInfo, RouteV4, WarmBootCache};
//! use std::sync::Arc;
//!
//! let asic = Arc::new(SimAsic::new());
//! let fib = FibSync::new(asic.clone(), PlatformConfig::default(), WarmBootCache::cold());
//!
//! let forward = RouteForwardInfo::NextHops("10.0.0.1@1,10.0.0.2@1".parse().unwrap());
//! fib.add_route(Vrf(0), &RouteV4::new("192.168.0.0".parse().unwrap(), 16, forward))
//!     .unwrap();
//! assert_eq!(asic.ecmp_count(), 1);
//! assert_eq!(asic.route_count(), 1);
//! ```

pub mod config;
pub mod context;
pub mod dump;
pub mod ecmp;
pub mod egress;
pub mod error;
pub mod fib_sync;
pub mod host;
pub mod host_table;
pub mod nexthop;
pub mod port_egress;
pub mod ref_map;
pub mod replay;
pub mod route;
pub mod route_table;
pub mod warm_boot;

pub use config::{FibSyncConfig, PlatformConfig};
pub use context::{HwContext, HwLockState};
pub use dump::{EcmpHostDump, FibDump, HostDump, HostTableDump, RouteDump};
pub use ecmp::{EcmpGroup, EcmpKey};
pub use egress::{EgressObject, MultipathEgress, UnicastEgress};
pub use error::{FibSyncError, Result};
pub use fib_sync::{FibSync, FibTables};
pub use host::{HostEntry, HostKey};
pub use host_table::HostTable;
pub use nexthop::{NextHop, NextHopSet, ParseNextHopError, RouteForwardAction, RouteForwardInfo};
pub use port_egress::{PortEgressIndex, PortEgressMap};
pub use replay::{FibEvent, ReplaySummary};
pub use route::RouteEntry;
pub use route_table::{AddressFamily, Route, RouteKey, RouteTable, RouteV4, RouteV6};
pub use warm_boot::{StaleEntries, WarmBootCache, WarmBootSnapshot};
