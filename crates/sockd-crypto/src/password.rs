//! Iterated-MD5 key derivation from the shared password.
//!
//! `segment[0] = MD5(password)`, `segment[i] = MD5(segment[i-1] || password)`,
//! concatenated and truncated to `KEY_SIZE` bytes. This is the classic
//! `EVP_BytesToKey`-style derivation the Shadowsocks wire format commits to;
//! MD5 is required here for wire compatibility, not because it is a good
//! general-purpose hash.

use md5::{Digest, Md5};

use crate::KEY_SIZE;

const SEGMENT_SIZE: usize = 16; // MD5 digest size

/// Derives a `KEY_SIZE`-byte key from `password`. Constant for the life of
/// the process; callers should compute it once and clone the bytes into
/// each per-connection cipher state.
#[inline]
pub fn derive_key(password: &[u8]) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    let mut segment = [0u8; SEGMENT_SIZE];
    let mut filled = 0;

    while filled < KEY_SIZE {
        let mut hasher = Md5::new();
        if filled > 0 {
            hasher.update(segment);
        }
        hasher.update(password);
        segment.copy_from_slice(&hasher.finalize());

        let take = SEGMENT_SIZE.min(KEY_SIZE - filled);
        key[filled..filled + take].copy_from_slice(&segment[..take]);
        filled += take;
    }

    key
}
