//! Registry of route entries keyed by (VRF, prefix).

use crate::context::HwContext;
use crate::error::{FibSyncError, Result};
use crate::host_table::HostTable;
use crate::nexthop::RouteForwardInfo;
use crate::route::RouteEntry;
use log::debug;
use sonic_asic::{IpPrefix, Vrf};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// Address types a route can be keyed on.
pub trait AddressFamily: Copy + fmt::Display {
    fn to_ip(self) -> IpAddr;
}

impl AddressFamily for Ipv4Addr {
    fn to_ip(self) -> IpAddr {
        IpAddr::V4(self)
    }
}

impl AddressFamily for Ipv6Addr {
    fn to_ip(self) -> IpAddr {
        IpAddr::V6(self)
    }
}

/// A route as handed down by the routing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route<A> {
    pub network: A,
    pub len: u8,
    pub forward: RouteForwardInfo,
}

pub type RouteV4 = Route<Ipv4Addr>;
pub type RouteV6 = Route<Ipv6Addr>;

impl<A: AddressFamily> Route<A> {
    pub fn new(network: A, len: u8, forward: RouteForwardInfo) -> Self {
        Self {
            network,
            len,
            forward,
        }
    }

    pub fn prefix(&self) -> Result<IpPrefix> {
        route_prefix(self.network, self.len)
    }
}

fn route_prefix<A: AddressFamily>(network: A, len: u8) -> Result<IpPrefix> {
    IpPrefix::new(network.to_ip(), len).map_err(|e| FibSyncError::InvalidRoute(e.to_string()))
}

/// Orders by VRF, then mask length, then network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteKey {
    pub vrf: Vrf,
    pub prefix: IpPrefix,
}

impl RouteKey {
    pub fn new(vrf: Vrf, prefix: IpPrefix) -> Self {
        Self { vrf, prefix }
    }
}

impl Ord for RouteKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.vrf
            .cmp(&other.vrf)
            .then_with(|| self.prefix.len().cmp(&other.prefix.len()))
            .then_with(|| self.prefix.network().cmp(&other.prefix.network()))
    }
}

impl PartialOrd for RouteKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.prefix, self.vrf)
    }
}

pub struct RouteTable {
    ctx: Arc<HwContext>,
    fib: BTreeMap<RouteKey, RouteEntry>,
}

impl RouteTable {
    pub fn new(ctx: Arc<HwContext>) -> Self {
        Self {
            ctx,
            fib: BTreeMap::new(),
        }
    }

    /// Adds or updates a route. A route that fails to program the first time
    /// is not kept.
    pub fn add_route<A: AddressFamily>(
        &mut self,
        hosts: &mut HostTable,
        vrf: Vrf,
        route: &Route<A>,
    ) -> Result<()> {
        let prefix = route.prefix()?;
        let key = RouteKey::new(vrf, prefix);
        let created = !self.fib.contains_key(&key);
        let entry = self
            .fib
            .entry(key)
            .or_insert_with(|| RouteEntry::new(vrf, prefix));

        if let Err(e) = entry.program(&self.ctx, hosts, &route.forward) {
            if created {
                self.fib.remove(&key);
            }
            return Err(e);
        }
        debug!("Route {} now {}", key, route.forward);
        Ok(())
    }

    pub fn delete_route<A: AddressFamily>(
        &mut self,
        hosts: &mut HostTable,
        vrf: Vrf,
        network: A,
        len: u8,
    ) -> Result<()> {
        let prefix = route_prefix(network, len)?;
        let entry = self
            .fib
            .remove(&RouteKey::new(vrf, prefix))
            .ok_or(FibSyncError::RouteNotFound { vrf, prefix })?;
        entry.destroy(&self.ctx, hosts);
        debug!("Route {} in {} deleted", prefix, vrf);
        Ok(())
    }

    pub fn get_route_if(&self, vrf: Vrf, prefix: IpPrefix) -> Option<&RouteEntry> {
        self.fib.get(&RouteKey::new(vrf, prefix))
    }

    pub fn get_route(&self, vrf: Vrf, prefix: IpPrefix) -> Result<&RouteEntry> {
        self.get_route_if(vrf, prefix)
            .ok_or(FibSyncError::RouteNotFound { vrf, prefix })
    }

    pub fn len(&self) -> usize {
        self.fib.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fib.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.fib.values()
    }
}
