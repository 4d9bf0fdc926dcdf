//! Drawbridge Common - Shared types for the bridging filter
//!
//! This crate provides the value types every other Drawbridge crate speaks:
//! - IPv4 address classes and the class B/C network split
//! - Traffic direction across the bridge
//! - Policy-class indices and IP protocol numbers
//! - Filter counters
//! - Error handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod stats;

pub use error::*;
pub use stats::{FilterStats, FilterStatsSnapshot};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Index selecting the four ACL row-sets that apply to a host
pub type PolicyClass = u8;

/// Class used for hosts on networks with no loaded host table
pub const DEFAULT_CLASS: PolicyClass = 0;

/// Number of addressable policy classes
pub const MAX_CLASSES: usize = 256;

/// IP protocol numbers the filter cares about
pub mod proto {
    /// Internet Control Message Protocol
    pub const ICMP: u8 = 1;
    /// Transmission Control Protocol
    pub const TCP: u8 = 6;
    /// User Datagram Protocol
    pub const UDP: u8 = 17;
}

/// Classful IPv4 address category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressClass {
    /// 0.0.0.0 - 127.255.255.255
    A,
    /// 128.0.0.0 - 191.255.255.255
    B,
    /// 192.0.0.0 - 223.255.255.255
    C,
    /// Multicast, 224.0.0.0 - 239.255.255.255
    D,
    /// Reserved, 240.0.0.0 and up
    E,
}

impl AddressClass {
    /// Classify an address by its leading bits
    #[inline(always)]
    pub const fn of(ip: u32) -> Self {
        match ip >> 28 {
            0x0..=0x7 => Self::A,
            0x8..=0xB => Self::B,
            0xC | 0xD => Self::C,
            0xE => Self::D,
            _ => Self::E,
        }
    }

    /// Split an address into network and host parts.
    ///
    /// Only class B and C networks carry host tables; every other class
    /// returns `None`.
    #[inline(always)]
    pub const fn split(ip: u32) -> Option<NetworkSplit> {
        match Self::of(ip) {
            Self::B => Some(NetworkSplit {
                network: ip & 0xFFFF_0000,
                host: (ip & 0xFFFF) as usize,
                table_len: CLASS_B_HOSTS,
            }),
            Self::C => Some(NetworkSplit {
                network: ip & 0xFFFF_FF00,
                host: (ip & 0xFF) as usize,
                table_len: CLASS_C_HOSTS,
            }),
            _ => None,
        }
    }
}

/// Host-table size for a class B network
pub const CLASS_B_HOSTS: usize = 65536;

/// Host-table size for a class C network
pub const CLASS_C_HOSTS: usize = 256;

/// Network/host decomposition of a class B or C address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkSplit {
    /// Network address with host bits cleared
    pub network: u32,
    /// Offset of the host within its network's host table
    pub host: usize,
    /// Number of entries in the network's host table
    pub table_len: usize,
}

/// Host-table length for a network address, if it is class B or C
pub const fn host_table_len(network: u32) -> Option<usize> {
    match AddressClass::split(network) {
        Some(split) => Some(split.table_len),
        None => None,
    }
}

/// Direction of a frame across the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Outside segment towards the protected inside segment
    Inbound,
    /// Inside segment towards the outside world
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("in"),
            Self::Outbound => f.write_str("out"),
        }
    }
}

/// Dotted-quad view of a host-order address, for logs
#[inline]
pub fn dotted(ip: u32) -> Ipv4Addr {
    Ipv4Addr::from(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_classes() {
        assert_eq!(AddressClass::of(0x0A00_0001), AddressClass::A); // 10.0.0.1
        assert_eq!(AddressClass::of(0x8001_0203), AddressClass::B); // 128.1.2.3
        assert_eq!(AddressClass::of(0xC0A8_0101), AddressClass::C); // 192.168.1.1
        assert_eq!(AddressClass::of(0xE000_0001), AddressClass::D); // 224.0.0.1
        assert_eq!(AddressClass::of(0xF000_0001), AddressClass::E);
    }

    #[test]
    fn test_network_split() {
        let b = AddressClass::split(0x8C10_2233).unwrap();
        assert_eq!(b.network, 0x8C10_0000);
        assert_eq!(b.host, 0x2233);
        assert_eq!(b.table_len, CLASS_B_HOSTS);

        let c = AddressClass::split(0xC0A8_0142).unwrap();
        assert_eq!(c.network, 0xC0A8_0100);
        assert_eq!(c.host, 0x42);
        assert_eq!(c.table_len, CLASS_C_HOSTS);

        assert!(AddressClass::split(0x0A00_0001).is_none());
        assert!(AddressClass::split(0xE000_0001).is_none());
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Inbound.to_string(), "in");
        assert_eq!(Direction::Outbound.to_string(), "out");
    }
}
