//! Framing cipher and key agreement
//!
//! # Key agreement
//!
//! Each side picks a random challenge and derives key material from the
//! shared password salted with it:
//!
//! ```text
//!   material(c) = HKDF-SHA256(ikm = password, salt = c, info = KEY_INFO)
//!   session     = material(c_client) XOR material(c_server)
//! ```
//!
//! Only the challenges cross the wire, so both ends arrive at the same
//! session key iff they hold the same password.
//!
//! # Cipher
//!
//! ChaCha20 keyed by the session key. The framing has no IV field, so the
//! nonce is fixed for the life of a session key and every message reuses
//! the same keystream prefix.

use crate::wire::CHALLENGE_LEN;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

/// Session key bytes
pub const KEY_LEN: usize = 32;

const KEY_INFO: &[u8] = b"drawbridge management session v1";
const SESSION_NONCE: [u8; 12] = [0u8; 12];

/// SYNC challenge
pub type Challenge = [u8; CHALLENGE_LEN];

/// Crypto errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// HKDF refused the output length
    #[error("key derivation failed")]
    Derive,
}

/// One side's contribution to a session key
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial([u8; KEY_LEN]);

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

/// Symmetric key for one SYNC epoch
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    /// Key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

fn derive_material(password: &[u8], challenge: &Challenge) -> Result<KeyMaterial, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(&challenge[..]), password);
    let mut okm = [0u8; KEY_LEN];
    hk.expand(KEY_INFO, &mut okm).map_err(|_| CryptoError::Derive)?;
    Ok(KeyMaterial(okm))
}

/// Fresh local key material and the challenge to send to the peer
pub fn client_init<R: RngCore + CryptoRng>(
    password: &[u8],
    rng: &mut R,
) -> Result<(KeyMaterial, Challenge), CryptoError> {
    let mut challenge = [0u8; CHALLENGE_LEN];
    rng.fill_bytes(&mut challenge);
    Ok((derive_material(password, &challenge)?, challenge))
}

/// The peer's key material, from the challenge it sent
pub fn server_init(password: &[u8], challenge: &Challenge) -> Result<KeyMaterial, CryptoError> {
    derive_material(password, challenge)
}

/// Combine both contributions; the order does not matter
pub fn build_new_session_key(local: &KeyMaterial, peer: &KeyMaterial) -> SessionKey {
    let mut key = [0u8; KEY_LEN];
    for (k, (a, b)) in key.iter_mut().zip(local.0.iter().zip(peer.0.iter())) {
        *k = a ^ b;
    }
    SessionKey(key)
}

/// Stream cipher applied in place to the encryption unit
pub trait FrameCipher: Send {
    /// Encrypt `buf` in place
    fn encrypt(&self, key: &SessionKey, buf: &mut [u8]);
    /// Decrypt `buf` in place
    fn decrypt(&self, key: &SessionKey, buf: &mut [u8]);
}

/// ChaCha20 framing cipher
#[derive(Debug, Default, Clone, Copy)]
pub struct ChaChaCipher;

impl ChaChaCipher {
    fn apply(key: &SessionKey, buf: &mut [u8]) {
        let mut cipher = ChaCha20::new(key.as_bytes().into(), &SESSION_NONCE.into());
        cipher.apply_keystream(buf);
    }
}

impl FrameCipher for ChaChaCipher {
    fn encrypt(&self, key: &SessionKey, buf: &mut [u8]) {
        Self::apply(key, buf);
    }

    fn decrypt(&self, key: &SessionKey, buf: &mut [u8]) {
        Self::apply(key, buf);
    }
}
