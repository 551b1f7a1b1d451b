//! Structured dump of the tables for debugging.

use crate::egress::EgressObject;
use crate::host_table::HostTable;
use crate::nexthop::{NextHopSet, RouteForwardInfo};
use crate::route_table::RouteTable;
use serde::Serialize;
use sonic_asic::{EgressId, IpPrefix, PortId, Vrf};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostDump {
    pub vrf: Vrf,
    pub ip: IpAddr,
    pub port: Option<PortId>,
    pub egress_id: Option<EgressId>,
    /// Absent for the fixed drop and to-CPU ids.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub egress: Option<EgressObject>,
    pub ref_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EcmpHostDump {
    pub vrf: Vrf,
    pub nexthops: NextHopSet,
    pub egress_id: EgressId,
    pub ecmp_egress_id: Option<EgressId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecmp_egress: Option<EgressObject>,
    pub ref_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDump {
    pub vrf: Vrf,
    pub prefix: IpPrefix,
    pub forward: Option<RouteForwardInfo>,
    pub egress_id: Option<EgressId>,
    pub host_row: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostTableDump {
    pub hosts: Vec<HostDump>,
    pub ecmp_hosts: Vec<EcmpHostDump>,
    pub port_egress: BTreeMap<PortId, BTreeSet<EgressId>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FibDump {
    pub host_table: HostTableDump,
    pub routes: Vec<RouteDump>,
    pub warm_boot_active: bool,
}

impl HostTable {
    pub fn dump(&self) -> HostTableDump {
        let hosts = self
            .hosts
            .iter()
            .map(|(key, host)| HostDump {
                vrf: key.vrf,
                ip: key.addr,
                port: host.port(),
                egress_id: host.egress_id(),
                egress: host.egress_id().and_then(|id| self.get_egress(id)).cloned(),
                ref_count: self.hosts.ref_count(key),
            })
            .collect();

        let ecmp_hosts = self
            .ecmp_hosts
            .iter()
            .map(|(key, group)| EcmpHostDump {
                vrf: key.vrf,
                nexthops: key.nexthops.clone(),
                egress_id: group.egress_id(),
                ecmp_egress_id: group.ecmp_egress_id(),
                ecmp_egress: group
                    .ecmp_egress_id()
                    .and_then(|id| self.get_egress(id))
                    .cloned(),
                ref_count: self.ecmp_hosts.ref_count(key),
            })
            .collect();

        let index = self.port_egress_index().snapshot();
        let port_egress = index
            .ports()
            .filter_map(|port| index.egress_ids(*port).map(|ids| (*port, ids.clone())))
            .collect();

        HostTableDump {
            hosts,
            ecmp_hosts,
            port_egress,
        }
    }
}

impl RouteTable {
    pub fn dump(&self) -> Vec<RouteDump> {
        self.iter()
            .map(|route| RouteDump {
                vrf: route.vrf(),
                prefix: route.prefix(),
                forward: route.forward().cloned(),
                egress_id: route.egress_id(),
                host_row: route.is_host_row(),
            })
            .collect()
    }
}
