//! Typed boundary to the switch's L3 programming primitives.
//!
//! The forwarding-state tables never touch the silicon directly; they talk to
//! an [`AsicL3Api`] implementation. This crate provides:
//!
//! - [`types`]: hardware identifiers (`Vrf`, `EgressId`, `PortId`,
//!   `InterfaceId`) plus `MacAddress` and `IpPrefix`
//! - [`error`]: status codes and `AsicError`
//! - [`api`]: the row types and the `AsicL3Api` trait
//! - [`sim`]: `SimAsic`, an in-memory implementation used by tests and
//!   the replay daemon
//!
//! # Example
//!
//! ```
//! use sonic_asic::{AsicL3Api, InterfaceId, L3EgressRow, SimAsic};
//!
//! let asic = SimAsic::new();
//! let id = asic.egress_create(&L3EgressRow::to_cpu(InterfaceId(1))).unwrap();
//! assert!(asic.egress(id).is_some());
//! ```

pub mod api;
pub mod error;
pub mod sim;
pub mod types;

pub use api::{AsicL3Api, EgressAction, L3EgressRow, L3Flags, L3HostRow, L3RouteRow};
pub use error::{AsicError, AsicResult, AsicStatus};
pub use sim::{SimAsic, SimOp, SIM_DROP_EGRESS_ID, SIM_TO_CPU_EGRESS_ID};
pub use types::{EgressId, InterfaceId, IpPrefix, MacAddress, PortId, TypeError, Vrf};
