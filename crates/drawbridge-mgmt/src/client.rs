//! Operator-side client codec
//!
//! Builds requests and reads replies for one filter. Transport is the
//! caller's business.
//!
//! ```ignore
//! let mut client = ManagerClient::new(Some(password));
//! socket.send(&client.sync()?)?;
//! client.complete_sync(&recv(&socket)?)?;
//! socket.send(&client.query(QueryKind::Networks, 0))?;
//! let reply = client.open(&recv(&socket)?)?;
//! ```

use crate::checksum::checksum;
use crate::crypto::{
    build_new_session_key, client_init, server_init, ChaChaCipher, Challenge, CryptoError, FrameCipher,
    KeyMaterial, SessionKey,
};
use crate::framing::{self, seal};
use crate::wire::{
    ErrorCode, FilterHeader, LoadFragment, MessageType, Query, QueryKind, Release, TableKind, WireError,
    CHALLENGE_LEN, CIPHER_OFFSET, FLAG_PASSWORD_LOADED, HEADER_LEN, LOAD_BEGIN, LOAD_END, MAX_FRAGMENT,
};
use bytes::Buf;
use drawbridge_common::FilterStatsSnapshot;
use rand::rngs::OsRng;
use thiserror::Error;

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed or corrupt reply
    #[error(transparent)]
    Wire(#[from] WireError),
    /// Key derivation failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// SYNC needs a password
    #[error("no password configured")]
    NoPassword,
    /// SYNCACK without a pending SYNC
    #[error("no SYNC in progress")]
    NoSyncPending,
    /// The filter answered with an ERROR
    #[error("filter refused: {0:?}")]
    Refused(ErrorCode),
    /// Reply of the wrong type
    #[error("unexpected reply type {0}")]
    Unexpected(u8),
}

/// Decoded reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply type
    pub msg_type: MessageType,
    /// Plaintext payload
    pub payload: Vec<u8>,
}

impl Reply {
    /// Error code, for ERROR replies
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self.msg_type {
            MessageType::Error => self.payload.first().and_then(|&c| ErrorCode::from_u8(c)),
            _ => None,
        }
    }
}

/// Client half of the management protocol
pub struct ManagerClient<C: FrameCipher = ChaChaCipher> {
    cipher: C,
    password: Option<Vec<u8>>,
    pending: Option<KeyMaterial>,
    key: Option<SessionKey>,
}

impl ManagerClient<ChaChaCipher> {
    /// Create client; `None` talks to filters without a password
    pub fn new(password: Option<Vec<u8>>) -> Self {
        Self::with_cipher(ChaChaCipher, password)
    }
}

impl<C: FrameCipher> ManagerClient<C> {
    /// Create client with a custom cipher
    pub fn with_cipher(cipher: C, password: Option<Vec<u8>>) -> Self {
        Self {
            cipher,
            password: password.filter(|p| !p.is_empty()),
            pending: None,
            key: None,
        }
    }

    fn flags(&self) -> u8 {
        if self.password.is_some() {
            FLAG_PASSWORD_LOADED
        } else {
            0
        }
    }

    /// Whether a session key is agreed
    pub fn is_synced(&self) -> bool {
        self.key.is_some()
    }

    /// Forget the session key
    pub fn reset(&mut self) {
        self.key = None;
        self.pending = None;
    }

    /// Start key agreement: the SYNC datagram to send
    pub fn sync(&mut self) -> Result<Vec<u8>, ClientError> {
        let password = self.password.as_deref().ok_or(ClientError::NoPassword)?;
        let (local, challenge) = client_init(password, &mut OsRng)?;
        self.pending = Some(local);
        self.key = None;
        Ok(seal(&self.cipher, None, MessageType::Sync, self.flags(), rand::random(), &challenge))
    }

    /// Finish key agreement from the filter's SYNCACK
    pub fn complete_sync(&mut self, datagram: &[u8]) -> Result<(), ClientError> {
        let header = FilterHeader::parse(datagram)?;
        if checksum(&datagram[CIPHER_OFFSET..], None) != 0 {
            return Err(WireError::Checksum.into());
        }
        let payload = &datagram[HEADER_LEN..];

        match MessageType::from_u8(header.msg_type) {
            Some(MessageType::SyncAck) => {}
            Some(MessageType::Error) => {
                let code = payload.first().and_then(|&c| ErrorCode::from_u8(c));
                return Err(code.map_or(ClientError::Unexpected(header.msg_type), ClientError::Refused));
            }
            _ => return Err(ClientError::Unexpected(header.msg_type)),
        }

        let challenge = payload
            .get(..CHALLENGE_LEN)
            .and_then(|c| Challenge::try_from(c).ok())
            .ok_or(WireError::Truncated {
                need: CHALLENGE_LEN,
                have: payload.len(),
            })?;
        let password = self.password.as_deref().ok_or(ClientError::NoPassword)?;
        let local = self.pending.take().ok_or(ClientError::NoSyncPending)?;
        let peer = server_init(password, &challenge)?;
        self.key = Some(build_new_session_key(&local, &peer));
        Ok(())
    }

    /// Seal a request
    pub fn request(&self, msg_type: MessageType, payload: &[u8]) -> Vec<u8> {
        seal(&self.cipher, self.key.as_ref(), msg_type, self.flags(), rand::random(), payload)
    }

    /// Open a reply
    pub fn open(&self, datagram: &[u8]) -> Result<Reply, ClientError> {
        let (header, payload) = framing::open(&self.cipher, self.key.as_ref(), datagram)?;
        let msg_type = MessageType::from_u8(header.msg_type).ok_or(ClientError::Unexpected(header.msg_type))?;
        Ok(Reply { msg_type, payload })
    }

    /// QUERY request
    pub fn query(&self, kind: QueryKind, arg: u32) -> Vec<u8> {
        let mut payload = Vec::with_capacity(Query::LEN);
        Query { kind: kind as u8, arg }.encode(&mut payload);
        self.request(MessageType::Query, &payload)
    }

    /// LOAD requests carrying a whole table image, in order
    pub fn load(&self, kind: TableKind, index: u32, image: &[u8]) -> Vec<Vec<u8>> {
        let chunks: Vec<&[u8]> = if image.is_empty() {
            vec![&[]]
        } else {
            image.chunks(MAX_FRAGMENT).collect()
        };
        let last = chunks.len() - 1;

        chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let mut flags = 0;
                if i == 0 {
                    flags |= LOAD_BEGIN;
                }
                if i == last {
                    flags |= LOAD_END;
                }
                let mut payload = Vec::new();
                LoadFragment {
                    kind: kind as u8,
                    flags,
                    index,
                    offset: (i * MAX_FRAGMENT) as u32,
                    data: chunk,
                }
                .encode(&mut payload);
                self.request(MessageType::Load, &payload)
            })
            .collect()
    }

    /// RELEASE request
    pub fn release(&self, kind: TableKind, index: u32) -> Vec<u8> {
        let mut payload = Vec::with_capacity(Release::LEN);
        Release { kind: kind as u8, index }.encode(&mut payload);
        self.request(MessageType::Release, &payload)
    }

    /// STATISTICS request
    pub fn statistics(&self, clear: bool) -> Vec<u8> {
        self.request(MessageType::Statistics, &[clear as u8])
    }
}

/// Decode a STATISTICSACK payload
pub fn parse_statistics(payload: &[u8]) -> Option<FilterStatsSnapshot> {
    if payload.len() != 8 * FilterStatsSnapshot::FIELDS {
        return None;
    }
    let mut buf = payload;
    let mut counters = [0u64; FilterStatsSnapshot::FIELDS];
    for counter in counters.iter_mut() {
        *counter = buf.get_u64();
    }
    Some(FilterStatsSnapshot::from_array(counters))
}

/// Decode a NETWORKS query reply
pub fn parse_networks(payload: &[u8]) -> Option<Vec<u32>> {
    let mut buf = payload;
    if buf.remaining() < 2 {
        return None;
    }
    let count = buf.get_u16() as usize;
    if buf.remaining() != count * 4 {
        return None;
    }
    Some((0..count).map(|_| buf.get_u32()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_fragmentation() {
        let client = ManagerClient::new(None);
        let image = vec![1u8; 2500];
        let frags = client.load(TableKind::Network, 0xC0A8_0100, &image);
        assert_eq!(frags.len(), 3);

        let parsed: Vec<_> = frags
            .iter()
            .map(|dg| {
                let reply = client.open(dg).unwrap();
                assert_eq!(reply.msg_type, MessageType::Load);
                reply.payload
            })
            .collect();
        let first = LoadFragment::parse(&parsed[0]).unwrap();
        let last = LoadFragment::parse(&parsed[2]).unwrap();
        assert!(first.is_begin() && !first.is_end());
        assert!(!last.is_begin() && last.is_end());
        assert_eq!(last.offset, 2048);
        assert_eq!(last.data.len(), 452);
    }

    #[test]
    fn test_empty_load_is_single_fragment() {
        let client = ManagerClient::new(None);
        let frags = client.load(TableKind::Reject, 0, &[]);
        assert_eq!(frags.len(), 1);
        let payload = client.open(&frags[0]).unwrap().payload;
        let frag = LoadFragment::parse(&payload).unwrap();
        assert!(frag.is_begin() && frag.is_end());
    }

    #[test]
    fn test_sync_needs_password() {
        let mut client = ManagerClient::new(None);
        assert!(matches!(client.sync(), Err(ClientError::NoPassword)));
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_networks(&[0, 1, 0xC0, 0xA8, 1, 0]), Some(vec![0xC0A8_0100]));
        assert_eq!(parse_networks(&[0, 2, 0xC0, 0xA8, 1, 0]), None);
        assert!(parse_statistics(&[0u8; 87]).is_none());
        let snap = parse_statistics(&[0u8; 88]).unwrap();
        assert_eq!(snap, FilterStatsSnapshot::default());
    }
}
