//! Route entries: one per (VRF, prefix).

use crate::context::HwContext;
use crate::error::{HwContextExt, Result};
use crate::host::HostKey;
use crate::host_table::HostTable;
use crate::nexthop::RouteForwardInfo;
use log::{debug, error};
use sonic_asic::{EgressId, IpPrefix, L3Flags, L3RouteRow, Vrf};

/// A programmed (or about to be programmed) route.
///
/// The entry holds a reference on the ECMP group of its next-hops, and for
/// host routes folded into the host table, a reference on the host entry
/// for its own address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    vrf: Vrf,
    prefix: IpPrefix,
    forward: Option<RouteForwardInfo>,
    egress_id: Option<EgressId>,
    added: bool,
    host_row: bool,
}

impl RouteEntry {
    pub(crate) fn new(vrf: Vrf, prefix: IpPrefix) -> Self {
        Self {
            vrf,
            prefix,
            forward: None,
            egress_id: None,
            added: false,
            host_row: false,
        }
    }

    pub fn vrf(&self) -> Vrf {
        self.vrf
    }

    pub fn prefix(&self) -> IpPrefix {
        self.prefix
    }

    pub fn forward(&self) -> Option<&RouteForwardInfo> {
        self.forward.as_ref()
    }

    pub fn egress_id(&self) -> Option<EgressId> {
        self.egress_id
    }

    pub fn is_added(&self) -> bool {
        self.added
    }

    /// Programmed as a host table row rather than an LPM row.
    pub fn is_host_row(&self) -> bool {
        self.host_row
    }

    fn host_key(&self) -> HostKey {
        HostKey::new(self.vrf, self.prefix.network())
    }

    fn can_use_host_table(&self, ctx: &HwContext) -> bool {
        self.prefix.is_host_route() && ctx.platform().host_table_for_host_routes
    }

    /// Points the route at `forward`.
    ///
    /// The new next-hops are acquired before anything is written, and the
    /// old ones released only once the new state is in hardware; on failure
    /// the route keeps its previous forwarding and references.
    pub(crate) fn program(
        &mut self,
        ctx: &HwContext,
        hosts: &mut HostTable,
        forward: &RouteForwardInfo,
    ) -> Result<()> {
        if self.added && self.forward.as_ref() == Some(forward) {
            return Ok(());
        }

        let egress = match forward {
            RouteForwardInfo::Drop => ctx.asic().drop_egress_id(),
            RouteForwardInfo::ToCpu => ctx.asic().to_cpu_egress_id(),
            RouteForwardInfo::NextHops(nexthops) => {
                hosts.inc_ref_or_create_ecmp_host(self.vrf, nexthops)?.egress_id()
            }
        };

        let programmed = if self.can_use_host_table(ctx) {
            self.program_host_route(hosts, egress, forward.is_multipath())
        } else {
            self.program_lpm_route(ctx, egress, forward.is_multipath())
        };
        if let Err(e) = programmed {
            if let Some(nexthops) = forward.nexthops() {
                hosts.deref_ecmp_host(self.vrf, nexthops);
            }
            if self.added && self.can_use_host_table(ctx) && !self.host_row {
                // The old host row is already gone; the route is no longer
                // in hardware.
                self.unprogrammed(hosts);
            }
            return Err(e);
        }

        if self.added {
            if let Some(old) = self.forward.as_ref().and_then(RouteForwardInfo::nexthops) {
                hosts.deref_ecmp_host(self.vrf, old);
            }
        }
        self.forward = Some(forward.clone());
        self.egress_id = Some(egress);
        self.added = true;
        Ok(())
    }

    fn unprogrammed(&mut self, hosts: &mut HostTable) {
        if let Some(old) = self.forward.take().as_ref().and_then(RouteForwardInfo::nexthops) {
            hosts.deref_ecmp_host(self.vrf, old);
        }
        self.egress_id = None;
        self.added = false;
    }

    fn program_host_route(&mut self, hosts: &mut HostTable, egress: EgressId, multipath: bool) -> Result<()> {
        let key = self.host_key();
        if self.host_row {
            debug!("Dereferencing host prefix {} in {}", self.prefix, self.vrf);
            hosts.release_host(&key);
            self.host_row = false;
        }
        hosts.acquire_host(key, Some(egress));
        if let Err(e) = hosts.add_host_row(&key, multipath) {
            hosts.release_host(&key);
            return Err(e);
        }
        self.host_row = true;
        Ok(())
    }

    fn program_lpm_route(&self, ctx: &HwContext, egress: EgressId, multipath: bool) -> Result<()> {
        let mut row = L3RouteRow::new(self.vrf, self.prefix, egress, multipath);

        let cached = ctx.warm_boot().find_route(self.vrf, self.prefix);
        let write = match &cached {
            Some(existing) if row.equivalent(existing) => {
                debug!("Route {} in {} already exists", self.prefix, self.vrf);
                false
            }
            Some(_) => {
                debug!("Updating route {} in {}", self.prefix, self.vrf);
                row.flags |= L3Flags::REPLACE;
                true
            }
            None => true,
        };

        if write {
            if self.added {
                row.flags |= L3Flags::REPLACE;
            }
            ctx.asic()
                .route_add(&row)
                .hw_context(|| format!("program route {} in {} @{}", self.prefix, self.vrf, egress))?;
            debug!("Programmed route {} in {} @{}", self.prefix, self.vrf, egress);
        }
        if cached.is_some() {
            ctx.warm_boot().programmed_route(self.vrf, self.prefix);
        }
        Ok(())
    }

    /// Removes the route from hardware and releases what it holds. A failed
    /// LPM delete is logged and the references are released anyway.
    pub(crate) fn destroy(self, ctx: &HwContext, hosts: &mut HostTable) {
        if !self.added {
            return;
        }
        if self.host_row {
            hosts.release_host(&self.host_key());
        } else {
            match ctx.asic().route_delete(self.vrf, self.prefix) {
                Ok(()) => debug!("Deleted route {} in {}", self.prefix, self.vrf),
                Err(e) => error!("Failed to delete route {} in {}: {}", self.prefix, self.vrf, e),
            }
        }
        if let Some(nexthops) = self.forward.as_ref().and_then(RouteForwardInfo::nexthops) {
            hosts.deref_ecmp_host(self.vrf, nexthops);
        }
    }
}
