//! In-memory ASIC.
//!
//! `SimAsic` keeps L3 state in plain maps behind a mutex. It counts every
//! mutating call that reaches "hardware" and can be told to fail the next
//! call of a given kind, which is what the table tests assert against. The
//! `preload_*` methods install state with explicit ids without counting as
//! writes, to stand in for what survived a restart.

use crate::api::{AsicL3Api, L3EgressRow, L3Flags, L3HostRow, L3RouteRow};
use crate::error::{AsicError, AsicResult, AsicStatus};
use crate::types::{EgressId, IpPrefix, PortId, Vrf};
use log::debug;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

pub const SIM_DROP_EGRESS_ID: EgressId = EgressId(100_000);
pub const SIM_TO_CPU_EGRESS_ID: EgressId = EgressId(100_001);
const FIRST_DYNAMIC_EGRESS_ID: u32 = 100_002;

/// Operation kinds that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimOp {
    EgressCreate,
    EgressReplace,
    EgressDestroy,
    EcmpCreate,
    EcmpDestroy,
    EcmpAddMember,
    EcmpRemoveMember,
    HostAdd,
    HostDelete,
    RouteAdd,
    RouteDelete,
}

#[derive(Debug, Default)]
struct SimState {
    next_id: u32,
    egress: BTreeMap<EgressId, L3EgressRow>,
    ecmp: BTreeMap<EgressId, BTreeSet<EgressId>>,
    hosts: BTreeMap<(Vrf, IpAddr), L3HostRow>,
    routes: BTreeMap<(Vrf, IpPrefix), L3RouteRow>,
    ports: BTreeMap<PortId, bool>,
    writes: u64,
    failures: BTreeSet<SimOp>,
}

impl SimState {
    /// Consumes a pending injected failure for `op`, then counts the write.
    fn begin(&mut self, op: SimOp) -> AsicResult<()> {
        if self.failures.remove(&op) {
            debug!("SimAsic: injected failure for {:?}", op);
            return Err(AsicError::from_status(AsicStatus::Failure));
        }
        self.writes += 1;
        Ok(())
    }

    fn alloc_id(&mut self) -> EgressId {
        let id = EgressId(self.next_id);
        self.next_id += 1;
        id
    }

    fn is_known_egress(&self, id: EgressId) -> bool {
        id == SIM_DROP_EGRESS_ID
            || id == SIM_TO_CPU_EGRESS_ID
            || self.egress.contains_key(&id)
            || self.ecmp.contains_key(&id)
    }

    fn bump_next_id(&mut self, id: EgressId) {
        if id.as_raw() >= self.next_id {
            self.next_id = id.as_raw() + 1;
        }
    }
}

/// In-memory implementation of [`AsicL3Api`].
#[derive(Debug)]
pub struct SimAsic {
    state: Mutex<SimState>,
}

impl Default for SimAsic {
    fn default() -> Self {
        Self::new()
    }
}

impl SimAsic {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                next_id: FIRST_DYNAMIC_EGRESS_ID,
                ..Default::default()
            }),
        }
    }

    /// Fails the next call of kind `op` with `E_FAIL`.
    pub fn fail_next(&self, op: SimOp) {
        self.state.lock().failures.insert(op);
    }

    /// Number of successful or attempted mutating calls so far.
    pub fn write_count(&self) -> u64 {
        self.state.lock().writes
    }

    pub fn set_port_state(&self, port: PortId, up: bool) {
        self.state.lock().ports.insert(port, up);
    }

    pub fn preload_egress(&self, id: EgressId, row: L3EgressRow) {
        let mut state = self.state.lock();
        state.bump_next_id(id);
        state.egress.insert(id, row);
    }

    pub fn preload_ecmp(&self, id: EgressId, members: impl IntoIterator<Item = EgressId>) {
        let mut state = self.state.lock();
        state.bump_next_id(id);
        state.ecmp.insert(id, members.into_iter().collect());
    }

    pub fn preload_host(&self, row: L3HostRow) {
        self.state.lock().hosts.insert((row.vrf, row.addr), row);
    }

    pub fn preload_route(&self, row: L3RouteRow) {
        self.state.lock().routes.insert((row.vrf, row.prefix), row);
    }

    pub fn egress(&self, id: EgressId) -> Option<L3EgressRow> {
        self.state.lock().egress.get(&id).copied()
    }

    pub fn egress_count(&self) -> usize {
        self.state.lock().egress.len()
    }

    pub fn ecmp(&self, id: EgressId) -> Option<BTreeSet<EgressId>> {
        self.state.lock().ecmp.get(&id).cloned()
    }

    pub fn ecmp_count(&self) -> usize {
        self.state.lock().ecmp.len()
    }

    pub fn host(&self, vrf: Vrf, addr: IpAddr) -> Option<L3HostRow> {
        self.state.lock().hosts.get(&(vrf, addr)).copied()
    }

    pub fn host_count(&self) -> usize {
        self.state.lock().hosts.len()
    }

    pub fn route(&self, vrf: Vrf, prefix: IpPrefix) -> Option<L3RouteRow> {
        self.state.lock().routes.get(&(vrf, prefix)).copied()
    }

    pub fn route_count(&self) -> usize {
        self.state.lock().routes.len()
    }
}

impl AsicL3Api for SimAsic {
    fn drop_egress_id(&self) -> EgressId {
        SIM_DROP_EGRESS_ID
    }

    fn to_cpu_egress_id(&self) -> EgressId {
        SIM_TO_CPU_EGRESS_ID
    }

    fn egress_create(&self, row: &L3EgressRow) -> AsicResult<EgressId> {
        let mut state = self.state.lock();
        state.begin(SimOp::EgressCreate)?;
        let id = state.alloc_id();
        state.egress.insert(id, *row);
        Ok(id)
    }

    fn egress_replace(&self, id: EgressId, row: &L3EgressRow) -> AsicResult<()> {
        let mut state = self.state.lock();
        state.begin(SimOp::EgressReplace)?;
        match state.egress.get_mut(&id) {
            Some(existing) => {
                *existing = *row;
                Ok(())
            }
            None => Err(AsicError::not_found(id.to_string())),
        }
    }

    fn egress_destroy(&self, id: EgressId) -> AsicResult<()> {
        let mut state = self.state.lock();
        state.begin(SimOp::EgressDestroy)?;
        state
            .egress
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AsicError::not_found(id.to_string()))
    }

    fn ecmp_create(&self, members: &[EgressId]) -> AsicResult<EgressId> {
        let mut state = self.state.lock();
        state.begin(SimOp::EcmpCreate)?;
        if let Some(missing) = members.iter().find(|m| !state.is_known_egress(**m)) {
            return Err(AsicError::invalid_parameter(format!(
                "unknown ecmp member {missing}"
            )));
        }
        let id = state.alloc_id();
        state.ecmp.insert(id, members.iter().copied().collect());
        Ok(id)
    }

    fn ecmp_destroy(&self, id: EgressId) -> AsicResult<()> {
        let mut state = self.state.lock();
        state.begin(SimOp::EcmpDestroy)?;
        state
            .ecmp
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AsicError::not_found(id.to_string()))
    }

    fn ecmp_members(&self, id: EgressId) -> AsicResult<Vec<EgressId>> {
        self.state
            .lock()
            .ecmp
            .get(&id)
            .map(|members| members.iter().copied().collect())
            .ok_or_else(|| AsicError::not_found(id.to_string()))
    }

    fn ecmp_add_member(&self, id: EgressId, member: EgressId) -> AsicResult<()> {
        let mut state = self.state.lock();
        state.begin(SimOp::EcmpAddMember)?;
        let members = state
            .ecmp
            .get_mut(&id)
            .ok_or_else(|| AsicError::not_found(id.to_string()))?;
        if !members.insert(member) {
            return Err(AsicError::already_exists(format!("{member} in {id}")));
        }
        Ok(())
    }

    fn ecmp_remove_member(&self, id: EgressId, member: EgressId) -> AsicResult<()> {
        let mut state = self.state.lock();
        state.begin(SimOp::EcmpRemoveMember)?;
        let members = state
            .ecmp
            .get_mut(&id)
            .ok_or_else(|| AsicError::not_found(id.to_string()))?;
        if !members.remove(&member) {
            return Err(AsicError::not_found(format!("{member} in {id}")));
        }
        Ok(())
    }

    fn host_add(&self, row: &L3HostRow) -> AsicResult<()> {
        let mut state = self.state.lock();
        state.begin(SimOp::HostAdd)?;
        let key = (row.vrf, row.addr);
        if state.hosts.contains_key(&key) && !row.flags.contains(L3Flags::REPLACE) {
            return Err(AsicError::already_exists(format!("host {}", row.addr)));
        }
        let mut stored = *row;
        stored.flags.set(L3Flags::REPLACE, false);
        state.hosts.insert(key, stored);
        Ok(())
    }

    fn host_delete(&self, vrf: Vrf, addr: IpAddr) -> AsicResult<()> {
        let mut state = self.state.lock();
        state.begin(SimOp::HostDelete)?;
        state
            .hosts
            .remove(&(vrf, addr))
            .map(|_| ())
            .ok_or_else(|| AsicError::not_found(format!("host {addr}")))
    }

    fn route_add(&self, row: &L3RouteRow) -> AsicResult<()> {
        let mut state = self.state.lock();
        state.begin(SimOp::RouteAdd)?;
        let key = (row.vrf, row.prefix);
        if state.routes.contains_key(&key) && !row.flags.contains(L3Flags::REPLACE) {
            return Err(AsicError::already_exists(format!("route {}", row.prefix)));
        }
        let mut stored = *row;
        stored.flags.set(L3Flags::REPLACE, false);
        state.routes.insert(key, stored);
        Ok(())
    }

    fn route_delete(&self, vrf: Vrf, prefix: IpPrefix) -> AsicResult<()> {
        let mut state = self.state.lock();
        state.begin(SimOp::RouteDelete)?;
        state
            .routes
            .remove(&(vrf, prefix))
            .map(|_| ())
            .ok_or_else(|| AsicError::not_found(format!("route {prefix}")))
    }

    fn port_states(&self) -> AsicResult<Vec<(PortId, bool)>> {
        Ok(self
            .state
            .lock()
            .ports
            .iter()
            .map(|(port, up)| (*port, *up))
            .collect())
    }
}
