//! Error types for the forwarding-state tables.
//!
//! Lookups of absent entries and hardware failures are recoverable and come
//! back as `FibSyncError`. Broken bookkeeping (refcount underflow, a cached
//! host row that disagrees with what we would program, a missing egress
//! object we hold a reference to) is not: those paths panic.

use sonic_asic::{AsicError, EgressId, IpPrefix, Vrf};
use std::net::IpAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FibSyncError {
    #[error("route not found: {prefix} in {vrf}")]
    RouteNotFound { vrf: Vrf, prefix: IpPrefix },

    #[error("host not found: {addr} in {vrf}")]
    HostNotFound { vrf: Vrf, addr: IpAddr },

    #[error("ECMP host not found: [{nexthops}] in {vrf}")]
    EcmpHostNotFound { vrf: Vrf, nexthops: String },

    /// The host forwards through an egress object it does not own (a drop,
    /// to-CPU or multipath id borrowed from a host route) and cannot be
    /// resolved to a neighbor in place.
    #[error("host {addr} in {vrf} forwards through shared {egress}")]
    EgressInUse {
        vrf: Vrf,
        addr: IpAddr,
        egress: EgressId,
    },

    /// A programming call failed; `context` names the object being written.
    #[error("failed to {context}: {source}")]
    Hardware {
        context: String,
        #[source]
        source: AsicError,
    },

    #[error("invalid route: {0}")]
    InvalidRoute(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FibSyncError {
    pub fn hardware(context: impl Into<String>, source: AsicError) -> Self {
        FibSyncError::Hardware {
            context: context.into(),
            source,
        }
    }

    /// True for the three recoverable lookup failures.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FibSyncError::RouteNotFound { .. }
                | FibSyncError::HostNotFound { .. }
                | FibSyncError::EcmpHostNotFound { .. }
        )
    }
}

/// Attaches a description of the object being programmed to a hardware error.
pub(crate) trait HwContextExt<T> {
    fn hw_context<F, S>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> HwContextExt<T> for sonic_asic::AsicResult<T> {
    fn hw_context<F, S>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| FibSyncError::hardware(context(), source))
    }
}

pub type Result<T> = std::result::Result<T, FibSyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use sonic_asic::AsicStatus;

    #[test]
    fn test_hardware_error_message_carries_context() {
        let res: sonic_asic::AsicResult<()> = Err(AsicError::from_status(AsicStatus::Busy));
        let err = res
            .hw_context(|| format!("program egress {}", EgressId(100_003)))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to program egress egress100003: hardware call failed: E_BUSY"
        );
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_classification() {
        let err = FibSyncError::RouteNotFound {
            vrf: Vrf(0),
            prefix: "10.0.0.0/24".parse().unwrap(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "route not found: 10.0.0.0/24 in vrf0");
    }
}
