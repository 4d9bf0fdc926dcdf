//! Wire format
//!
//! Every datagram starts with a 6-byte big-endian [`FilterHeader`]:
//!
//! ```text
//!  0        1        2                 4                 6
//!  ┌────────┬────────┬─────────────────┬─────────────────┬─────────────
//!  │  type  │ flags  │      nonce      │    checksum     │ payload ...
//!  └────────┴────────┴─────────────────┴─────────────────┴─────────────
//!                    └──────────── encryption unit ──────────────────►
//! ```

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Header bytes
pub const HEADER_LEN: usize = 6;

/// Offset of the first encrypted byte
pub const CIPHER_OFFSET: usize = 2;

/// Offset of the checksum field
pub const CHECKSUM_OFFSET: usize = 4;

/// Bytes in a SYNC challenge
pub const CHALLENGE_LEN: usize = 16;

/// Longest accepted password
pub const MAX_PASSWORD_LEN: usize = 64;

/// Most data bytes carried by one LOAD fragment
pub const MAX_FRAGMENT: usize = 1024;

/// Header flag: sender has a password loaded
pub const FLAG_PASSWORD_LOADED: u8 = 0x01;

/// LOAD flag: first fragment of a transaction
pub const LOAD_BEGIN: u8 = 0x01;

/// LOAD flag: last fragment of a transaction
pub const LOAD_END: u8 = 0x02;

/// Bytes before the data in a LOAD payload
pub const LOAD_HEADER_LEN: usize = 12;

/// Wire errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Fewer bytes than the message needs
    #[error("truncated message: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required
        need: usize,
        /// Bytes present
        have: usize,
    },
    /// Declared length disagrees with the bytes present
    #[error("length field says {declared}, {actual} bytes follow")]
    LengthMismatch {
        /// Length in the message
        declared: usize,
        /// Bytes actually present
        actual: usize,
    },
    /// Checksum did not verify
    #[error("checksum mismatch")]
    Checksum,
}

fn need(buf: &[u8], need: usize) -> Result<(), WireError> {
    if buf.len() < need {
        return Err(WireError::Truncated {
            need,
            have: buf.len(),
        });
    }
    Ok(())
}

/// Message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Start key agreement
    Sync = 1,
    /// Server half of key agreement
    SyncAck = 2,
    /// Restart the filter
    Reboot = 3,
    /// Reboot accepted
    RebootAck = 4,
    /// Replace the password
    NewKey = 5,
    /// Password replaced
    NewKeyAck = 6,
    /// Read a table
    Query = 7,
    /// Query result
    QueryAck = 8,
    /// Stage part of a table
    Load = 9,
    /// Fragment accepted
    LoadAck = 10,
    /// Persist dirty tables
    Write = 11,
    /// Tables persisted
    WriteAck = 12,
    /// Reset a table
    Release = 13,
    /// Table reset
    ReleaseAck = 14,
    /// Read or clear counters
    Statistics = 15,
    /// Counter values
    StatisticsAck = 16,
    /// Typed failure, never encrypted
    Error = 17,
}

impl MessageType {
    /// Decode a type byte
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Sync,
            2 => Self::SyncAck,
            3 => Self::Reboot,
            4 => Self::RebootAck,
            5 => Self::NewKey,
            6 => Self::NewKeyAck,
            7 => Self::Query,
            8 => Self::QueryAck,
            9 => Self::Load,
            10 => Self::LoadAck,
            11 => Self::Write,
            12 => Self::WriteAck,
            13 => Self::Release,
            14 => Self::ReleaseAck,
            15 => Self::Statistics,
            16 => Self::StatisticsAck,
            17 => Self::Error,
            _ => return None,
        })
    }
}

/// ERROR reply codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// Network not loaded, or not a class B/C network
    NoNetwork = 1,
    /// Table memory exhausted
    NoMemory = 2,
    /// Table file could not be opened
    DataFile = 3,
    /// Table file could not be written
    DataWrite = 4,
    /// Password file could not be opened
    PassFile = 5,
    /// Password file could not be written
    PassWrite = 6,
    /// No valid session, or the session failed its integrity check
    LostSync = 7,
    /// This end requires a password and the peer has none
    Secure = 8,
    /// This end has no password and the peer does
    Insecure = 9,
    /// Malformed or unsupported request
    Command = 10,
}

impl ErrorCode {
    /// Decode a code byte
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::NoNetwork,
            2 => Self::NoMemory,
            3 => Self::DataFile,
            4 => Self::DataWrite,
            5 => Self::PassFile,
            6 => Self::PassWrite,
            7 => Self::LostSync,
            8 => Self::Secure,
            9 => Self::Insecure,
            10 => Self::Command,
            _ => return None,
        })
    }
}

/// Datagram header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterHeader {
    /// Raw message type
    pub msg_type: u8,
    /// Sender flags
    pub flags: u8,
    /// Random per-message value
    pub nonce: u16,
    /// Ones'-complement checksum
    pub checksum: u16,
}

impl FilterHeader {
    /// Parse the header at the front of a datagram
    pub fn parse(datagram: &[u8]) -> Result<Self, WireError> {
        need(datagram, HEADER_LEN)?;
        let mut buf = datagram;
        Ok(Self {
            msg_type: buf.get_u8(),
            flags: buf.get_u8(),
            nonce: buf.get_u16(),
            checksum: buf.get_u16(),
        })
    }

    /// Append the header
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.msg_type);
        buf.put_u8(self.flags);
        buf.put_u16(self.nonce);
        buf.put_u16(self.checksum);
    }

    /// Whether the sender has a password loaded
    #[inline]
    pub fn password_loaded(&self) -> bool {
        self.flags & FLAG_PASSWORD_LOADED != 0
    }
}

/// QUERY sub-types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueryKind {
    /// Loaded network addresses
    Networks = 1,
    /// Policy class of one host
    Host = 2,
    /// Reject table image
    Reject = 3,
    /// Allow table image
    Allow = 4,
    /// One class's four lists
    Class = 5,
}

impl QueryKind {
    /// Decode a kind byte
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Networks,
            2 => Self::Host,
            3 => Self::Reject,
            4 => Self::Allow,
            5 => Self::Class,
            _ => return None,
        })
    }
}

/// Table selector used by LOAD and RELEASE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TableKind {
    /// A network's host table
    Network = 1,
    /// Access-class lists
    Class = 2,
    /// Reject table
    Reject = 3,
    /// Allow table
    Allow = 4,
}

impl TableKind {
    /// Decode a kind byte
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Network,
            2 => Self::Class,
            3 => Self::Reject,
            4 => Self::Allow,
            _ => return None,
        })
    }
}

/// QUERY payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Query {
    /// Raw sub-type
    pub kind: u8,
    /// Host address or class index
    pub arg: u32,
}

impl Query {
    /// Encoded length
    pub const LEN: usize = 5;

    /// Parse a QUERY payload
    pub fn parse(payload: &[u8]) -> Result<Self, WireError> {
        need(payload, Self::LEN)?;
        let mut buf = payload;
        Ok(Self {
            kind: buf.get_u8(),
            arg: buf.get_u32(),
        })
    }

    /// Append the payload
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_u32(self.arg);
    }
}

/// RELEASE payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    /// Raw table kind
    pub kind: u8,
    /// Network address for network releases
    pub index: u32,
}

impl Release {
    /// Encoded length
    pub const LEN: usize = 5;

    /// Parse a RELEASE payload
    pub fn parse(payload: &[u8]) -> Result<Self, WireError> {
        need(payload, Self::LEN)?;
        let mut buf = payload;
        Ok(Self {
            kind: buf.get_u8(),
            index: buf.get_u32(),
        })
    }

    /// Append the payload
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_u32(self.index);
    }
}

/// One LOAD fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadFragment<'a> {
    /// Raw table kind
    pub kind: u8,
    /// [`LOAD_BEGIN`] / [`LOAD_END`]
    pub flags: u8,
    /// Network address or class index
    pub index: u32,
    /// Byte offset into the table image
    pub offset: u32,
    /// Chunk of the table image
    pub data: &'a [u8],
}

impl<'a> LoadFragment<'a> {
    /// Parse a LOAD payload
    pub fn parse(payload: &'a [u8]) -> Result<Self, WireError> {
        need(payload, LOAD_HEADER_LEN)?;
        let mut buf = payload;
        let kind = buf.get_u8();
        let flags = buf.get_u8();
        let index = buf.get_u32();
        let offset = buf.get_u32();
        let len = buf.get_u16() as usize;
        if len != buf.len() {
            return Err(WireError::LengthMismatch {
                declared: len,
                actual: buf.len(),
            });
        }
        Ok(Self {
            kind,
            flags,
            index,
            offset,
            data: buf,
        })
    }

    /// Append the payload
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_u8(self.flags);
        buf.put_u32(self.index);
        buf.put_u32(self.offset);
        buf.put_u16(self.data.len() as u16);
        buf.put_slice(self.data);
    }

    /// First fragment of a transaction
    #[inline]
    pub fn is_begin(&self) -> bool {
        self.flags & LOAD_BEGIN != 0
    }

    /// Last fragment of a transaction
    #[inline]
    pub fn is_end(&self) -> bool {
        self.flags & LOAD_END != 0
    }

    /// LOADACK payload echoing this fragment
    pub fn ack(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(9);
        buf.put_u8(self.kind);
        buf.put_u32(self.index);
        buf.put_u32(self.offset);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = FilterHeader {
            msg_type: MessageType::Query as u8,
            flags: FLAG_PASSWORD_LOADED,
            nonce: 0xBEEF,
            checksum: 0x1234,
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf, [7, 1, 0xBE, 0xEF, 0x12, 0x34]);
        assert_eq!(FilterHeader::parse(&buf).unwrap(), header);
        assert!(header.password_loaded());
        assert!(FilterHeader::parse(&buf[..5]).is_err());
    }

    #[test]
    fn test_codes() {
        for code in 1..=17u8 {
            assert_eq!(MessageType::from_u8(code).map(|t| t as u8), Some(code));
        }
        assert_eq!(MessageType::from_u8(0), None);
        assert_eq!(MessageType::from_u8(18), None);
        assert_eq!(ErrorCode::from_u8(7), Some(ErrorCode::LostSync));
        assert_eq!(ErrorCode::from_u8(11), None);
        assert_eq!(QueryKind::from_u8(6), None);
        assert_eq!(TableKind::from_u8(4), Some(TableKind::Allow));
    }

    #[test]
    fn test_load_fragment() {
        let frag = LoadFragment {
            kind: TableKind::Network as u8,
            flags: LOAD_BEGIN | LOAD_END,
            index: 0xC0A8_0100,
            offset: 128,
            data: &[1, 2, 3],
        };
        let mut buf = Vec::new();
        frag.encode(&mut buf);
        assert_eq!(buf.len(), LOAD_HEADER_LEN + 3);

        let parsed = LoadFragment::parse(&buf).unwrap();
        assert_eq!(parsed, frag);
        assert!(parsed.is_begin() && parsed.is_end());
        assert_eq!(parsed.ack(), [1, 0xC0, 0xA8, 0x01, 0x00, 0, 0, 0, 128]);

        buf.push(9);
        assert_eq!(
            LoadFragment::parse(&buf),
            Err(WireError::LengthMismatch { declared: 3, actual: 4 })
        );
    }

    #[test]
    fn test_query_and_release() {
        let q = Query { kind: QueryKind::Host as u8, arg: 0x8C10_0505 };
        let mut buf = Vec::new();
        q.encode(&mut buf);
        assert_eq!(Query::parse(&buf).unwrap(), q);
        assert!(Query::parse(&buf[..4]).is_err());

        let r = Release { kind: TableKind::Reject as u8, index: 0 };
        let mut buf = Vec::new();
        r.encode(&mut buf);
        assert_eq!(Release::parse(&buf).unwrap(), r);
    }
}
