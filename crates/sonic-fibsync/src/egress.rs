//! Egress objects: the hardware forwarding actions hosts and routes point at.

use crate::context::HwContext;
use crate::error::{HwContextExt, Result};
use crate::host::HostKey;
use log::{debug, error};
use serde::Serialize;
use sonic_asic::{AsicResult, EgressId, L3EgressRow, PortId, Vrf};
use std::collections::BTreeSet;
use std::net::IpAddr;

/// A unicast egress object and the next-hop it was programmed for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnicastEgress {
    pub vrf: Vrf,
    pub addr: IpAddr,
    #[serde(flatten)]
    pub row: L3EgressRow,
}

impl UnicastEgress {
    pub fn owned_by(&self, key: &HostKey) -> bool {
        self.vrf == key.vrf && self.addr == key.addr
    }
}

/// A multipath egress object over other egress ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultipathEgress {
    /// Paths the group was configured with. Paths on down links may be
    /// absent from hardware.
    pub paths: BTreeSet<EgressId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EgressObject {
    Unicast(UnicastEgress),
    Multipath(MultipathEgress),
}

impl EgressObject {
    pub fn as_unicast(&self) -> Option<&UnicastEgress> {
        match self {
            EgressObject::Unicast(unicast) => Some(unicast),
            EgressObject::Multipath(_) => None,
        }
    }

    pub fn as_multipath(&self) -> Option<&MultipathEgress> {
        match self {
            EgressObject::Multipath(multipath) => Some(multipath),
            EgressObject::Unicast(_) => None,
        }
    }

    pub fn port(&self) -> Option<PortId> {
        self.as_unicast().and_then(|unicast| unicast.row.port())
    }
}

/// Writes a unicast egress object and returns its id.
///
/// With `existing` the object is reprogrammed in place, and only if the row
/// changed. Otherwise an object left over from before a warm boot for the
/// same next-hop is adopted, and only a fresh one is allocated when there
/// is none.
pub(crate) fn program_unicast(
    ctx: &HwContext,
    existing: Option<(EgressId, &UnicastEgress)>,
    desired: &UnicastEgress,
) -> Result<EgressId> {
    if let Some((id, current)) = existing {
        if current.row != desired.row {
            ctx.asic()
                .egress_replace(id, &desired.row)
                .hw_context(|| format!("reprogram {} for {}", id, desired.addr))?;
            debug!("Reprogrammed {} for {} to {}", id, desired.addr, desired.row.action);
        }
        return Ok(id);
    }

    let cached = ctx.warm_boot().find_egress(desired.vrf, desired.addr);
    let id = match cached {
        Some((id, row)) => {
            if row != desired.row {
                ctx.asic()
                    .egress_replace(id, &desired.row)
                    .hw_context(|| format!("update cached {} for {}", id, desired.addr))?;
                debug!("Updated warm boot {} for {}", id, desired.addr);
            }
            ctx.warm_boot().programmed_egress(desired.vrf, desired.addr);
            id
        }
        None => {
            let id = ctx
                .asic()
                .egress_create(&desired.row)
                .hw_context(|| format!("create egress for {}", desired.addr))?;
            debug!("Created {} for {} ({})", id, desired.addr, desired.row.action);
            id
        }
    };
    Ok(id)
}

/// Creates (or adopts from the warm-boot cache) a multipath object over
/// `paths`.
pub(crate) fn create_multipath(ctx: &HwContext, paths: &BTreeSet<EgressId>) -> Result<EgressId> {
    let cached = ctx.warm_boot().find_ecmp(paths);
    if let Some(id) = cached {
        ctx.warm_boot().programmed_ecmp(id);
        debug!("Reusing warm boot ecmp {} over {:?}", id, paths);
        return Ok(id);
    }
    let members: Vec<EgressId> = paths.iter().copied().collect();
    let id = ctx
        .asic()
        .ecmp_create(&members)
        .hw_context(|| format!("create ecmp over {:?}", members))?;
    debug!("Created ecmp {} over {:?}", id, members);
    Ok(id)
}

/// Re-adds `path` to a multipath object if it is one of the configured
/// paths and hardware does not already have it. Returns whether hardware
/// changed.
pub(crate) fn add_path_checked(
    ctx: &HwContext,
    ecmp: EgressId,
    configured: &BTreeSet<EgressId>,
    path: EgressId,
) -> AsicResult<bool> {
    if !configured.contains(&path) {
        return Ok(false);
    }
    if ctx.asic().ecmp_members(ecmp)?.contains(&path) {
        return Ok(false);
    }
    ctx.asic().ecmp_add_member(ecmp, path)?;
    debug!("Added {} to ecmp {}", path, ecmp);
    Ok(true)
}

/// Removes `path` from a multipath object if hardware has it.
pub(crate) fn remove_path_checked(ctx: &HwContext, ecmp: EgressId, path: EgressId) -> AsicResult<bool> {
    if !ctx.asic().ecmp_members(ecmp)?.contains(&path) {
        return Ok(false);
    }
    ctx.asic().ecmp_remove_member(ecmp, path)?;
    debug!("Removed {} from ecmp {}", path, ecmp);
    Ok(true)
}

/// Frees the hardware object behind the last reference to `id`.
pub(crate) fn destroy(ctx: &HwContext, id: EgressId, object: &EgressObject) {
    let res = match object {
        EgressObject::Unicast(_) => ctx.asic().egress_destroy(id),
        EgressObject::Multipath(_) => ctx.asic().ecmp_destroy(id),
    };
    match res {
        Ok(()) => debug!("Destroyed {}", id),
        Err(e) => error!("Failed to destroy {}: {}", id, e),
    }
}
