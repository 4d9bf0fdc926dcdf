//! Sealing and opening datagrams
//!
//! Shared by the filter side and the operator client so both frame
//! messages identically.

use crate::checksum::checksum;
use crate::crypto::{FrameCipher, SessionKey};
use crate::wire::{FilterHeader, MessageType, WireError, CHECKSUM_OFFSET, CIPHER_OFFSET, HEADER_LEN};

/// Build a datagram.
///
/// With a key, everything after the flags byte is encrypted, except for
/// ERROR messages which always travel in the clear.
pub fn seal<C: FrameCipher + ?Sized>(
    cipher: &C,
    key: Option<&SessionKey>,
    msg_type: MessageType,
    flags: u8,
    nonce: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(HEADER_LEN + payload.len());
    FilterHeader {
        msg_type: msg_type as u8,
        flags,
        nonce,
        checksum: 0,
    }
    .encode(&mut datagram);
    datagram.extend_from_slice(payload);

    let sum = checksum(&datagram[CIPHER_OFFSET..], None);
    datagram[CHECKSUM_OFFSET..HEADER_LEN].copy_from_slice(&sum.to_be_bytes());

    if let Some(key) = key {
        if msg_type != MessageType::Error {
            cipher.encrypt(key, &mut datagram[CIPHER_OFFSET..]);
        }
    }
    datagram
}

/// Decrypt (when keyed and not ERROR) and verify a datagram.
///
/// Returns the plaintext header and payload.
pub fn open<C: FrameCipher + ?Sized>(
    cipher: &C,
    key: Option<&SessionKey>,
    datagram: &[u8],
) -> Result<(FilterHeader, Vec<u8>), WireError> {
    let header = FilterHeader::parse(datagram)?;
    let mut plain = datagram.to_vec();

    if let Some(key) = key {
        if header.msg_type != MessageType::Error as u8 {
            cipher.decrypt(key, &mut plain[CIPHER_OFFSET..]);
        }
    }
    if checksum(&plain[CIPHER_OFFSET..], None) != 0 {
        return Err(WireError::Checksum);
    }

    let header = FilterHeader::parse(&plain)?;
    Ok((header, plain.split_off(HEADER_LEN)))
}
