//! Hardware-facing identifiers and address types.
//!
//! Every identifier the L3 tables hand out or consume is a distinct newtype
//! so that an egress id can never be passed where a port or a VRF is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Parse failures for the address types in this module.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix: {0}")]
    InvalidIpPrefix(String),
}

macro_rules! define_hw_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Returns the raw hardware value.
            pub const fn as_raw(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "{}"), self.0)
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                $name(raw)
            }
        }
    };
}

define_hw_id!(
    /// Virtual routing/forwarding instance.
    Vrf,
    "vrf"
);
define_hw_id!(
    /// Hardware-assigned id of an egress object (unicast or multipath).
    EgressId,
    "egress"
);
define_hw_id!(
    /// Front-panel port number. Port 0 is never a valid output port.
    PortId,
    "port"
);
define_hw_id!(
    /// L3 interface the egress object sources packets from.
    InterfaceId,
    "intf"
);

/// A 48-bit Ethernet MAC address.
///
/// ```
/// use sonic_asic::MacAddress;
///
/// let mac: MacAddress = "02:00:00:00:00:0a".parse().unwrap();
/// assert_eq!(mac.to_string(), "02:00:00:00:00:0a");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypeError::InvalidMacAddress(s.to_string());
        let mut bytes = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

/// An IP network in CIDR notation, with host bits cleared.
///
/// Prefixes are always stored masked, so `10.0.0.1/24` and `10.0.0.0/24`
/// name the same route-table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpPrefix {
    network: IpAddr,
    len: u8,
}

impl IpPrefix {
    /// Builds a prefix, masking off host bits.
    ///
    /// # Errors
    ///
    /// Fails if `len` exceeds 32 for IPv4 or 128 for IPv6.
    pub fn new(network: IpAddr, len: u8) -> Result<Self, TypeError> {
        let max_len = max_prefix_len(&network);
        if len > max_len {
            return Err(TypeError::InvalidIpPrefix(format!(
                "{network}/{len}: length exceeds {max_len}"
            )));
        }
        Ok(IpPrefix {
            network: mask_address(network, len),
            len,
        })
    }

    pub const fn network(&self) -> IpAddr {
        self.network
    }

    pub const fn len(&self) -> u8 {
        self.len
    }

    pub const fn is_ipv6(&self) -> bool {
        self.network.is_ipv6()
    }

    /// True for a full-length prefix (/32 for IPv4, /128 for IPv6).
    pub fn is_host_route(&self) -> bool {
        self.len == max_prefix_len(&self.network)
    }
}

fn max_prefix_len(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn mask_address(addr: IpAddr, len: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(len)).unwrap_or(0);
            IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
        }
        IpAddr::V6(v6) => {
            let mask = u128::MAX.checked_shl(128 - u32::from(len)).unwrap_or(0);
            IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
        }
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.len)
    }
}

impl FromStr for IpPrefix {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .rsplit_once('/')
            .ok_or_else(|| TypeError::InvalidIpPrefix(s.to_string()))?;
        let network: IpAddr = addr
            .parse()
            .map_err(|_| TypeError::InvalidIpAddress(addr.to_string()))?;
        let len: u8 = len
            .parse()
            .map_err(|_| TypeError::InvalidIpPrefix(s.to_string()))?;
        IpPrefix::new(network, len)
    }
}

impl TryFrom<String> for IpPrefix {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpPrefix> for String {
    fn from(prefix: IpPrefix) -> String {
        prefix.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddress = "00-11-22-aa-bb-cc".parse().unwrap();
        assert_eq!(mac.octets(), [0x00, 0x11, 0x22, 0xaa, 0xbb, 0xcc]);
        assert_eq!(mac.to_string(), "00:11:22:aa:bb:cc");
    }

    #[test]
    fn test_mac_rejects_garbage() {
        assert!("00:11:22:33:44".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44:55:66".parse::<MacAddress>().is_err());
        assert!("0:11:22:33:44:55".parse::<MacAddress>().is_err());
        assert!("zz:11:22:33:44:55".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_prefix_masks_host_bits() {
        let prefix: IpPrefix = "10.0.0.77/24".parse().unwrap();
        assert_eq!(prefix.to_string(), "10.0.0.0/24");

        let v6: IpPrefix = "2001:db8::1/32".parse().unwrap();
        assert_eq!(v6.to_string(), "2001:db8::/32");
    }

    #[test]
    fn test_prefix_zero_length() {
        let default: IpPrefix = "192.168.1.1/0".parse().unwrap();
        assert_eq!(default.network(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert!(!default.is_host_route());
    }

    #[test]
    fn test_prefix_host_route() {
        assert!("10.1.1.1/32".parse::<IpPrefix>().unwrap().is_host_route());
        assert!("2001:db8::1/128".parse::<IpPrefix>().unwrap().is_host_route());
        assert!(!"10.1.1.0/31".parse::<IpPrefix>().unwrap().is_host_route());
    }

    #[test]
    fn test_prefix_length_bounds() {
        assert!("10.0.0.0/33".parse::<IpPrefix>().is_err());
        assert!("::/129".parse::<IpPrefix>().is_err());
        assert!("10.0.0.0".parse::<IpPrefix>().is_err());
    }

    #[test]
    fn test_ids_display() {
        assert_eq!(EgressId(100_002).to_string(), "egress100002");
        assert_eq!(PortId(7).to_string(), "port7");
        assert_eq!(Vrf(0).to_string(), "vrf0");
    }
}
