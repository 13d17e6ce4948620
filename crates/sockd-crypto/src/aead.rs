//! Per-session AEAD construction: HKDF-SHA1 subkey derivation plus a
//! strictly single-owner nonce counter.
//!
//! `AeadSession` is `Direction`-tagged so the read half and write half of a
//! connection each own exactly one nonce counter and nothing else mutable,
//! a session never has to reason about another session's state.

use byteorder::{LittleEndian, WriteBytesExt};
use hkdf::Hkdf;
use sha1::Sha1;

use crate::{CryptoError, KEY_SIZE};

#[cfg(feature = "aead-chacha20poly1305")]
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key as CipherKey, Nonce as CipherNonce, Tag,
};

#[cfg(feature = "aead-aes128gcm")]
use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes128Gcm, Key as CipherKey, Nonce as CipherNonce, Tag,
};

#[cfg(feature = "aead-chacha20poly1305")]
type Cipher = ChaCha20Poly1305;
#[cfg(feature = "aead-aes128gcm")]
type Cipher = Aes128Gcm;

/// Session key length for the compiled-in AEAD, in bytes.
#[cfg(feature = "aead-chacha20poly1305")]
const SESSION_KEY_SIZE: usize = 32;
#[cfg(feature = "aead-aes128gcm")]
const SESSION_KEY_SIZE: usize = 16;

/// Subkey derivation info string, fixed by the wire protocol.
const SUBKEY_INFO: &[u8] = b"ss-subkey";

/// AEAD authentication tag length in bytes.
pub const MAC_SIZE: usize = 16;
/// AEAD nonce length in bytes.
pub const NONCE_SIZE: usize = 12;

/// Which side of a connection this session encrypts/decrypts for. Only
/// used for logging/debug context; the nonce discipline is identical in
/// either direction, each direction simply owns an independent counter.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Direction {
    Read,
    Write,
}

/// One AEAD session: a keyed cipher plus its exclusively-owned nonce
/// counter. A `AeadSession` must never be shared between threads/tasks;
/// the nonce counter is not synchronized, by design.
pub struct AeadSession {
    cipher: Cipher,
    nonce: u64,
    direction: Direction,
}

impl AeadSession {
    /// Derives the session key from `derived_key` and `salt` via
    /// HKDF-SHA1(info = "ss-subkey") and constructs a fresh session with
    /// its nonce counter at zero.
    #[inline]
    pub fn new(derived_key: &[u8; KEY_SIZE], salt: &[u8], direction: Direction) -> Result<AeadSession, CryptoError> {
        let hk = Hkdf::<Sha1>::new(Some(salt), derived_key);
        let mut subkey = vec![0u8; SESSION_KEY_SIZE];
        hk.expand(SUBKEY_INFO, &mut subkey)
            .map_err(|_| CryptoError::HkdfExpand)?;

        let cipher = Cipher::new(CipherKey::from_slice(&subkey));

        Ok(AeadSession {
            cipher,
            nonce: 0,
            direction,
        })
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current nonce value, exposed for the monotonicity property test
    ///.
    #[inline]
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    #[inline]
    fn nonce_bytes(&self) -> CipherNonce {
        let mut bytes = [0u8; NONCE_SIZE];
        (&mut bytes[..8])
            .write_u64::<LittleEndian>(self.nonce)
            .expect("nonce buffer is exactly 8 bytes for a u64");
        *CipherNonce::from_slice(&bytes)
    }

    #[inline]
    fn advance_nonce(&mut self) {
        self.nonce = self.nonce.checked_add(1).expect("nonce space exhausted");
    }

    /// Seals `plain` in place, appending the tag, and increments the nonce.
    /// `buf` must have exactly `plain_len + MAC_SIZE` capacity on entry
    /// containing the plaintext in the first `plain_len` bytes.
    #[inline]
    pub fn seal(&mut self, buf: &mut Vec<u8>) -> Result<(), CryptoError> {
        let nonce = self.nonce_bytes();
        let tag = self
            .cipher
            .encrypt_in_place_detached(&nonce, b"", buf)
            .map_err(|_| CryptoError::OpenFailed)?;
        buf.extend_from_slice(&tag);
        self.advance_nonce();
        Ok(())
    }

    /// Opens `sealed` in place (ciphertext followed by a trailing tag),
    /// truncating the tag off on success, and increments the nonce. Any
    /// failure is terminal for the session.
    #[inline]
    pub fn open(&mut self, sealed: &mut Vec<u8>) -> Result<(), CryptoError> {
        if sealed.len() < MAC_SIZE {
            return Err(CryptoError::OpenFailed);
        }
        let split = sealed.len() - MAC_SIZE;
        let tag = Tag::clone_from_slice(&sealed[split..]);
        let nonce = self.nonce_bytes();
        sealed.truncate(split);

        self.cipher
            .decrypt_in_place_detached(&nonce, b"", sealed, &tag)
            .map_err(|_| CryptoError::OpenFailed)?;
        self.advance_nonce();
        Ok(())
    }
}
