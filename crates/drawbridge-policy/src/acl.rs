//! Access-control lists
//!
//! Port-range lists and network allow/reject entries, plus their fixed-size
//! binary images (big-endian) used on the management wire and on disk.
//!
//! Lookups here are pure. All mutation goes through [`crate::AccessControlStore`].

use bytes::{Buf, BufMut};
use drawbridge_common::DrawbridgeError;

/// Rows in one port-range list, sentinel included
pub const MAX_RANGES: usize = 32;

/// Bytes in one encoded port-range list
pub const LIST_IMAGE_LEN: usize = MAX_RANGES * 4;

/// Bytes in one encoded class (four lists)
pub const CLASS_IMAGE_LEN: usize = LIST_IMAGE_LEN * 4;

/// Bytes in one encoded allow entry
pub const ALLOW_ENTRY_LEN: usize = 8 + LIST_IMAGE_LEN;

/// Bytes in one encoded reject entry
pub const REJECT_ENTRY_LEN: usize = 8;

/// Inclusive port range; `begin == 0` marks the end of a list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortRange {
    /// First port
    pub begin: u16,
    /// Last port
    pub end: u16,
}

impl PortRange {
    /// The list terminator
    pub const SENTINEL: Self = Self { begin: 0, end: 0 };

    /// Create a new range
    pub const fn new(begin: u16, end: u16) -> Self {
        Self { begin, end }
    }

    /// Whether this row terminates the list
    #[inline(always)]
    pub const fn is_sentinel(&self) -> bool {
        self.begin == 0
    }
}

/// Ordered port-range list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRangeList {
    rows: Vec<PortRange>,
}

impl PortRangeList {
    /// List that denies every port
    pub fn deny_all() -> Self {
        Self {
            rows: vec![PortRange::SENTINEL],
        }
    }

    /// List that allows every nonzero port
    pub fn allow_all() -> Self {
        Self::from_ranges(&[(1, u16::MAX)])
    }

    /// Build from `(begin, end)` pairs; the sentinel is appended.
    ///
    /// Pairs past the row limit are dropped.
    pub fn from_ranges(ranges: &[(u16, u16)]) -> Self {
        let mut rows: Vec<PortRange> = ranges
            .iter()
            .take(MAX_RANGES - 1)
            .map(|&(begin, end)| PortRange::new(begin, end))
            .collect();
        rows.push(PortRange::SENTINEL);
        Self { rows }
    }

    /// Raw rows, sentinel included
    pub fn rows(&self) -> &[PortRange] {
        &self.rows
    }

    /// Check a port against the list.
    ///
    /// Rows are scanned in order and the first row whose `end` reaches the
    /// port decides: allowed iff that row is not the sentinel and `begin`
    /// is at or below the port. Reaching the sentinel first denies.
    #[inline]
    pub fn check_port(&self, port: u16) -> bool {
        for row in &self.rows {
            if row.is_sentinel() {
                return false;
            }
            if row.end >= port {
                return port >= row.begin;
            }
        }
        false
    }

    /// Append the fixed-size image
    pub fn encode(&self, buf: &mut impl BufMut) {
        for i in 0..MAX_RANGES {
            let row = self.rows.get(i).copied().unwrap_or(PortRange::SENTINEL);
            buf.put_u16(row.begin);
            buf.put_u16(row.end);
        }
    }

    /// Read one fixed-size image
    pub fn decode(buf: &mut impl Buf) -> Result<Self, DrawbridgeError> {
        if buf.remaining() < LIST_IMAGE_LEN {
            return Err(DrawbridgeError::MalformedTable(format!(
                "port list needs {} bytes, {} left",
                LIST_IMAGE_LEN,
                buf.remaining()
            )));
        }
        let mut rows = Vec::with_capacity(MAX_RANGES);
        let mut terminated = false;
        for _ in 0..MAX_RANGES {
            let row = PortRange::new(buf.get_u16(), buf.get_u16());
            if !terminated {
                terminated = row.is_sentinel();
                rows.push(row);
            }
        }
        Ok(Self { rows })
    }
}

impl Default for PortRangeList {
    fn default() -> Self {
        Self::allow_all()
    }
}

/// The four row-sets selected by a policy class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassAcl {
    /// Inbound TCP, by destination port
    pub inbound: PortRangeList,
    /// Outbound TCP, by destination port
    pub outbound: PortRangeList,
    /// Inbound TCP exception, by source port
    pub source: PortRangeList,
    /// Inbound UDP, by destination port
    pub udp: PortRangeList,
}

impl ClassAcl {
    /// Append the four list images in order in/out/source/udp
    pub fn encode(&self, buf: &mut impl BufMut) {
        self.inbound.encode(buf);
        self.outbound.encode(buf);
        self.source.encode(buf);
        self.udp.encode(buf);
    }

    /// Read one class image
    pub fn decode(buf: &mut impl Buf) -> Result<Self, DrawbridgeError> {
        Ok(Self {
            inbound: PortRangeList::decode(buf)?,
            outbound: PortRangeList::decode(buf)?,
            source: PortRangeList::decode(buf)?,
            udp: PortRangeList::decode(buf)?,
        })
    }
}

/// Entry tested by network/mask
pub trait NetworkMatch {
    /// Network address
    fn network(&self) -> u32;
    /// Network mask
    fn mask(&self) -> u32;
}

/// Network granted extra outbound ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowEntry {
    /// Network address
    pub network: u32,
    /// Network mask
    pub mask: u32,
    /// Extra outbound destination ports
    pub ranges: PortRangeList,
}

impl AllowEntry {
    /// Append the fixed-size image
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.network);
        buf.put_u32(self.mask);
        self.ranges.encode(buf);
    }

    /// Read one entry image
    pub fn decode(buf: &mut impl Buf) -> Result<Self, DrawbridgeError> {
        if buf.remaining() < ALLOW_ENTRY_LEN {
            return Err(DrawbridgeError::MalformedTable("truncated allow entry".into()));
        }
        Ok(Self {
            network: buf.get_u32(),
            mask: buf.get_u32(),
            ranges: PortRangeList::decode(buf)?,
        })
    }
}

impl NetworkMatch for AllowEntry {
    fn network(&self) -> u32 {
        self.network
    }
    fn mask(&self) -> u32 {
        self.mask
    }
}

/// Network whose inbound traffic is always dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectEntry {
    /// Network address
    pub network: u32,
    /// Network mask
    pub mask: u32,
}

impl RejectEntry {
    /// Append the fixed-size image
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.network);
        buf.put_u32(self.mask);
    }

    /// Read one entry image
    pub fn decode(buf: &mut impl Buf) -> Result<Self, DrawbridgeError> {
        if buf.remaining() < REJECT_ENTRY_LEN {
            return Err(DrawbridgeError::MalformedTable("truncated reject entry".into()));
        }
        Ok(Self {
            network: buf.get_u32(),
            mask: buf.get_u32(),
        })
    }
}

impl NetworkMatch for RejectEntry {
    fn network(&self) -> u32 {
        self.network
    }
    fn mask(&self) -> u32 {
        self.mask
    }
}

/// First entry whose masked network equals the masked address.
///
/// An entry with a zero network ends the list.
#[inline]
pub fn match_network<E: NetworkMatch>(list: &[E], addr: u32) -> Option<&E> {
    for entry in list {
        if entry.network() == 0 {
            return None;
        }
        if entry.network() & entry.mask() == addr & entry.mask() {
            return Some(entry);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_port_list() {
        let list = PortRangeList::from_ranges(&[(80, 80)]);
        assert!(list.check_port(80));
        assert!(!list.check_port(81));
        assert!(!list.check_port(79));
    }

    #[test]
    fn test_multiple_ranges() {
        let list = PortRangeList::from_ranges(&[(20, 25), (80, 80), (1024, 65535)]);
        assert!(list.check_port(21));
        assert!(!list.check_port(26));
        assert!(!list.check_port(443));
        assert!(list.check_port(1024));
        assert!(list.check_port(65535));
    }

    #[test]
    fn test_sentinel_stops_scan() {
        // Rows after the sentinel are never consulted
        let mut image = Vec::new();
        PortRangeList::from_ranges(&[(10, 10)]).encode(&mut image);
        image[4..8].copy_from_slice(&[0, 0, 0, 99]);
        image[8..12].copy_from_slice(&[0, 50, 0, 60]);

        let list = PortRangeList::decode(&mut image.as_slice()).unwrap();
        assert_eq!(list.rows().len(), 2);
        assert!(!list.check_port(55));
    }

    #[test]
    fn test_deny_and_allow_all() {
        assert!(!PortRangeList::deny_all().check_port(22));
        assert!(PortRangeList::allow_all().check_port(22));
        assert!(!PortRangeList::allow_all().check_port(0));
    }

    #[test]
    fn test_class_image_roundtrip() {
        let acl = ClassAcl {
            inbound: PortRangeList::from_ranges(&[(25, 25), (80, 80)]),
            outbound: PortRangeList::allow_all(),
            source: PortRangeList::from_ranges(&[(20, 20)]),
            udp: PortRangeList::deny_all(),
        };
        let mut image = Vec::new();
        acl.encode(&mut image);
        assert_eq!(image.len(), CLASS_IMAGE_LEN);
        assert_eq!(ClassAcl::decode(&mut image.as_slice()).unwrap(), acl);
    }

    #[test]
    fn test_truncated_list_image() {
        let image = [0u8; LIST_IMAGE_LEN - 1];
        assert!(PortRangeList::decode(&mut image.as_slice()).is_err());
    }

    #[test]
    fn test_match_network_first_wins() {
        let list = [
            RejectEntry { network: 0xC0A8_0100, mask: 0xFFFF_FF00 },
            RejectEntry { network: 0xC0A8_0000, mask: 0xFFFF_0000 },
            RejectEntry { network: 0, mask: 0 },
            RejectEntry { network: 0x0A00_0000, mask: 0xFF00_0000 },
        ];
        assert_eq!(match_network(&list, 0xC0A8_0105).unwrap().mask, 0xFFFF_FF00);
        assert_eq!(match_network(&list, 0xC0A8_0905).unwrap().mask, 0xFFFF_0000);
        // Past the terminator
        assert!(match_network(&list, 0x0A01_0203).is_none());
    }
}
