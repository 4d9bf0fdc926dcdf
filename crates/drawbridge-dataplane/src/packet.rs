//! Frame and header views
//!
//! Read-only views over the bytes the filter needs. Nothing here copies
//! the packet; every accessor checks bounds and reports truncation instead
//! of panicking.

use thiserror::Error;

/// Bytes in an Ethernet II header
pub const ETHERNET_HEADER_LEN: usize = 14;

/// Smallest legal IPv4 header
pub const IPV4_MIN_HEADER_LEN: usize = 20;

/// TCP bytes needed to reach the flags octet
pub const TCP_MIN_LEN: usize = 14;

/// UDP bytes needed to read both ports
pub const UDP_MIN_LEN: usize = 4;

/// TCP SYN flag
pub const TCP_SYN: u8 = 0x02;

/// TCP ACK flag
pub const TCP_ACK: u8 = 0x10;

/// Header parse errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Fewer bytes than the header needs
    #[error("truncated header: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required
        need: usize,
        /// Bytes present
        have: usize,
    },
    /// IHL below the minimum
    #[error("bad IPv4 header length {0}")]
    BadHeaderLength(usize),
}

/// Internal protocol tag derived from the link layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolTag {
    /// IPv4
    Ip,
    /// Address resolution
    Arp,
    /// Reverse address resolution
    Rarp,
    /// Anything else, 802.1Q tagged frames included
    Other,
}

impl ProtocolTag {
    /// Map an Ethernet type
    pub const fn from_ethertype(ethertype: u16) -> Self {
        match ethertype {
            0x0800 => Self::Ip,
            0x0806 => Self::Arp,
            0x8035 => Self::Rarp,
            _ => Self::Other,
        }
    }
}

/// Split an Ethernet II frame into its tag and network-layer payload
pub fn split_ethernet(frame: &[u8]) -> Result<(ProtocolTag, &[u8]), ParseError> {
    if frame.len() < ETHERNET_HEADER_LEN {
        return Err(ParseError::Truncated {
            need: ETHERNET_HEADER_LEN,
            have: frame.len(),
        });
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    Ok((ProtocolTag::from_ethertype(ethertype), &frame[ETHERNET_HEADER_LEN..]))
}

/// IPv4 header fields the filter reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Header length in bytes
    pub header_len: usize,
    /// Total length field
    pub total_len: usize,
    /// Fragment offset in 8-byte units
    pub fragment_offset: u16,
    /// Upper-layer protocol
    pub protocol: u8,
    /// Source address
    pub src: u32,
    /// Destination address
    pub dst: u32,
}

impl Ipv4Header {
    /// Parse the fixed part of an IPv4 header
    pub fn parse(packet: &[u8]) -> Result<Self, ParseError> {
        if packet.len() < IPV4_MIN_HEADER_LEN {
            return Err(ParseError::Truncated {
                need: IPV4_MIN_HEADER_LEN,
                have: packet.len(),
            });
        }

        let header_len = ((packet[0] & 0x0F) as usize) * 4;
        if header_len < IPV4_MIN_HEADER_LEN {
            return Err(ParseError::BadHeaderLength(header_len));
        }
        if header_len > packet.len() {
            return Err(ParseError::Truncated {
                need: header_len,
                have: packet.len(),
            });
        }

        Ok(Self {
            header_len,
            total_len: u16::from_be_bytes([packet[2], packet[3]]) as usize,
            fragment_offset: u16::from_be_bytes([packet[6], packet[7]]) & 0x1FFF,
            protocol: packet[9],
            src: u32::from_be_bytes([packet[12], packet[13], packet[14], packet[15]]),
            dst: u32::from_be_bytes([packet[16], packet[17], packet[18], packet[19]]),
        })
    }

    /// Upper-layer bytes present in this fragment
    #[inline]
    pub fn payload<'a>(&self, packet: &'a [u8]) -> &'a [u8] {
        let end = self.total_len.min(packet.len());
        packet.get(self.header_len..end).unwrap_or(&[])
    }
}

/// Source and destination ports at the front of a TCP or UDP header
#[inline]
pub fn ports(l4: &[u8]) -> Option<(u16, u16)> {
    if l4.len() < 4 {
        return None;
    }
    Some((
        u16::from_be_bytes([l4[0], l4[1]]),
        u16::from_be_bytes([l4[2], l4[3]]),
    ))
}
