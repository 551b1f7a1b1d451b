//! L3 programming primitives.
//!
//! `AsicL3Api` is the boundary between the forwarding-state tables and the
//! switch silicon. Every call either succeeds, or fails with an `AsicError`
//! and leaves hardware unchanged.

use crate::error::AsicResult;
use crate::types::{EgressId, InterfaceId, IpPrefix, MacAddress, PortId, Vrf};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Flags carried on host and route rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct L3Flags(u32);

impl L3Flags {
    pub const NONE: Self = Self(0);
    /// Row keys on an IPv6 address.
    pub const IP6: Self = Self(1 << 0);
    /// Row points at a multipath egress object.
    pub const MULTIPATH: Self = Self(1 << 1);
    /// Overwrite an existing row instead of failing with `AlreadyExists`.
    pub const REPLACE: Self = Self(1 << 2);

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, flag: Self, on: bool) {
        if on {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }

    /// Flags that describe what a row forwards to, ignoring write modifiers.
    pub fn forwarding_bits(&self) -> Self {
        Self(self.0 & (Self::IP6.0 | Self::MULTIPATH.0))
    }
}

impl std::ops::BitOr for L3Flags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for L3Flags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// What a unicast egress object does with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EgressAction {
    Forward { mac: MacAddress, port: PortId },
    Drop,
    ToCpu,
}

impl fmt::Display for EgressAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EgressAction::Forward { mac, port } => write!(f, "forward({mac}, {port})"),
            EgressAction::Drop => write!(f, "drop"),
            EgressAction::ToCpu => write!(f, "to_cpu"),
        }
    }
}

/// A unicast egress object as written to hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct L3EgressRow {
    pub intf: InterfaceId,
    #[serde(flatten)]
    pub action: EgressAction,
}

impl L3EgressRow {
    pub fn forward(intf: InterfaceId, mac: MacAddress, port: PortId) -> Self {
        Self {
            intf,
            action: EgressAction::Forward { mac, port },
        }
    }

    pub fn drop(intf: InterfaceId) -> Self {
        Self {
            intf,
            action: EgressAction::Drop,
        }
    }

    pub fn to_cpu(intf: InterfaceId) -> Self {
        Self {
            intf,
            action: EgressAction::ToCpu,
        }
    }

    /// Output port, if the row forwards out of one.
    pub fn port(&self) -> Option<PortId> {
        match self.action {
            EgressAction::Forward { port, .. } => Some(port),
            _ => None,
        }
    }
}

/// An exact-match host table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct L3HostRow {
    pub vrf: Vrf,
    pub addr: IpAddr,
    pub egress: EgressId,
    pub flags: L3Flags,
}

impl L3HostRow {
    pub fn new(vrf: Vrf, addr: IpAddr, egress: EgressId, multipath: bool) -> Self {
        let mut flags = L3Flags::NONE;
        flags.set(L3Flags::IP6, addr.is_ipv6());
        flags.set(L3Flags::MULTIPATH, multipath);
        Self {
            vrf,
            addr,
            egress,
            flags,
        }
    }

    /// Compares the fields that determine forwarding.
    ///
    /// Bits other than `IP6` and `MULTIPATH` read back from hardware are not
    /// reliable and are ignored.
    pub fn equivalent(&self, other: &L3HostRow) -> bool {
        self.flags.forwarding_bits() == other.flags.forwarding_bits()
            && self.vrf == other.vrf
            && self.egress == other.egress
    }
}

/// A longest-prefix-match route table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct L3RouteRow {
    pub vrf: Vrf,
    pub prefix: IpPrefix,
    pub egress: EgressId,
    pub flags: L3Flags,
}

impl L3RouteRow {
    pub fn new(vrf: Vrf, prefix: IpPrefix, egress: EgressId, multipath: bool) -> Self {
        let mut flags = L3Flags::NONE;
        flags.set(L3Flags::IP6, prefix.is_ipv6());
        flags.set(L3Flags::MULTIPATH, multipath);
        Self {
            vrf,
            prefix,
            egress,
            flags,
        }
    }

    pub fn equivalent(&self, other: &L3RouteRow) -> bool {
        self.flags.forwarding_bits() == other.flags.forwarding_bits()
            && self.egress == other.egress
    }
}

/// Hardware L3 programming interface.
///
/// Implementations must be callable from any thread; callers serialize
/// mutations with their own hardware lock.
pub trait AsicL3Api: Send + Sync {
    /// Pre-created egress id that drops packets. Never destroyed.
    fn drop_egress_id(&self) -> EgressId;

    /// Pre-created egress id that punts packets to the CPU. Never destroyed.
    fn to_cpu_egress_id(&self) -> EgressId;

    fn egress_create(&self, row: &L3EgressRow) -> AsicResult<EgressId>;

    /// Reprograms an existing egress object in place, keeping its id.
    fn egress_replace(&self, id: EgressId, row: &L3EgressRow) -> AsicResult<()>;

    fn egress_destroy(&self, id: EgressId) -> AsicResult<()>;

    /// Creates a multipath egress object over `members`.
    fn ecmp_create(&self, members: &[EgressId]) -> AsicResult<EgressId>;

    fn ecmp_destroy(&self, id: EgressId) -> AsicResult<()>;

    /// Members currently installed in hardware for a multipath object.
    fn ecmp_members(&self, id: EgressId) -> AsicResult<Vec<EgressId>>;

    fn ecmp_add_member(&self, id: EgressId, member: EgressId) -> AsicResult<()>;

    fn ecmp_remove_member(&self, id: EgressId, member: EgressId) -> AsicResult<()>;

    /// Adds a host row; `REPLACE` in the row flags overwrites.
    fn host_add(&self, row: &L3HostRow) -> AsicResult<()>;

    fn host_delete(&self, vrf: Vrf, addr: IpAddr) -> AsicResult<()>;

    /// Adds a route row; `REPLACE` in the row flags overwrites.
    fn route_add(&self, row: &L3RouteRow) -> AsicResult<()>;

    fn route_delete(&self, vrf: Vrf, prefix: IpPrefix) -> AsicResult<()>;

    /// Every front-panel port with its current link state.
    fn port_states(&self) -> AsicResult<Vec<(PortId, bool)>>;
}
