//! Single-shot salted AEAD datagrams for UDP.
//!
//! Each packet carries its own 32-byte salt followed by one sealed AEAD
//! payload, no frame length, no nonce continuity across packets (a fresh
//! `AeadSession` is constructed per datagram, nonce always starts at
//! zero). Uses the same `sockd_crypto` primitives as `sockd_proto::frame`,
//! applied once instead of per-frame.

use sockd_crypto::aead::{AeadSession, Direction};
use sockd_crypto::{CryptoError, KEY_SIZE};

/// Seals `payload` into a salt-prefixed datagram: `salt(32) ||
/// AEAD_sealed(payload)`.
pub fn seal_datagram(derived_key: &[u8; KEY_SIZE], payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut salt = vec![0u8; KEY_SIZE];
    sockd_crypto::random_bytes(&mut salt);

    let mut session = AeadSession::new(derived_key, &salt, Direction::Write)?;
    let mut buf = payload.to_vec();
    session.seal(&mut buf)?;

    let mut datagram = salt;
    datagram.extend_from_slice(&buf);
    Ok(datagram)
}

/// Opens a salt-prefixed datagram, returning the decrypted payload.
/// Fails if the datagram is shorter than the salt.
pub fn open_datagram(derived_key: &[u8; KEY_SIZE], datagram: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if datagram.len() < KEY_SIZE {
        return Err(CryptoError::OpenFailed);
    }
    let (salt, sealed) = datagram.split_at(KEY_SIZE);

    let mut session = AeadSession::new(derived_key, salt, Direction::Read)?;
    let mut buf = sealed.to_vec();
    session.open(&mut buf)?;
    Ok(buf)
}
