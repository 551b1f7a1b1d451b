//! Next-hops and route forwarding information.

use serde::{Deserialize, Serialize};
use sonic_asic::InterfaceId;
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// One resolved-or-not path: the L3 interface and the gateway address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NextHop {
    pub intf: InterfaceId,
    pub addr: IpAddr,
}

impl NextHop {
    pub fn new(intf: InterfaceId, addr: IpAddr) -> Self {
        Self { intf, addr }
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.addr, self.intf.as_raw())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid next-hop: {0}")]
pub struct ParseNextHopError(String);

impl FromStr for NextHop {
    type Err = ParseNextHopError;

    /// Parses `addr@intf`, e.g. `10.0.0.1@3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, intf) = s
            .trim()
            .rsplit_once('@')
            .ok_or_else(|| ParseNextHopError(s.to_string()))?;
        let addr = addr.parse().map_err(|_| ParseNextHopError(s.to_string()))?;
        let intf: u32 = intf.parse().map_err(|_| ParseNextHopError(s.to_string()))?;
        Ok(Self::new(InterfaceId(intf), addr))
    }
}

/// An ordered, duplicate-free set of next-hops. Two routes with the same
/// set share one ECMP group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NextHopSet(BTreeSet<NextHop>);

impl NextHopSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, nexthop: NextHop) -> bool {
        self.0.insert(nexthop)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NextHop> {
        self.0.iter()
    }
}

impl FromIterator<NextHop> for NextHopSet {
    fn from_iter<I: IntoIterator<Item = NextHop>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a NextHopSet {
    type Item = &'a NextHop;
    type IntoIter = std::collections::btree_set::Iter<'a, NextHop>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for NextHopSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nexthops: Vec<_> = self.0.iter().map(|nh| nh.to_string()).collect();
        write!(f, "{}", nexthops.join(","))
    }
}

impl FromStr for NextHopSet {
    type Err = ParseNextHopError;

    /// Parses a comma-separated list of `addr@intf`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::new());
        }
        s.split(',').map(str::parse::<NextHop>).collect()
    }
}

/// What a route does with matching packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteForwardAction {
    Drop,
    ToCpu,
    NextHops,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "nexthops", rename_all = "snake_case")]
pub enum RouteForwardInfo {
    Drop,
    ToCpu,
    NextHops(NextHopSet),
}

impl RouteForwardInfo {
    pub fn action(&self) -> RouteForwardAction {
        match self {
            RouteForwardInfo::Drop => RouteForwardAction::Drop,
            RouteForwardInfo::ToCpu => RouteForwardAction::ToCpu,
            RouteForwardInfo::NextHops(_) => RouteForwardAction::NextHops,
        }
    }

    pub fn nexthops(&self) -> Option<&NextHopSet> {
        match self {
            RouteForwardInfo::NextHops(nexthops) => Some(nexthops),
            _ => None,
        }
    }

    /// More than one path: the egress is a multipath object.
    pub fn is_multipath(&self) -> bool {
        self.nexthops().is_some_and(|nexthops| nexthops.len() > 1)
    }
}

impl fmt::Display for RouteForwardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteForwardInfo::Drop => write!(f, "DROP"),
            RouteForwardInfo::ToCpu => write!(f, "TO_CPU"),
            RouteForwardInfo::NextHops(nexthops) => write!(f, "[{}]", nexthops),
        }
    }
}
