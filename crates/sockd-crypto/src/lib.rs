//! Key derivation, AEAD sessions and the legacy stream cipher.
//!
//! Free functions operating on caller-owned buffers, a little-endian nonce
//! counter, and a `random_bytes` helper backed by a CSPRNG. RustCrypto's
//! ChaCha20-Poly1305/AES-GCM implementations back the AEAD path so the
//! derived key, HKDF-SHA1 subkey and legacy AES-256-CTR path are all
//! bit-exact with the wire protocol sockd has to interoperate with.

#![cfg_attr(
    all(feature = "aead-chacha20poly1305", feature = "aead-aes128gcm"),
    allow(unused)
)]

#[cfg(all(feature = "aead-chacha20poly1305", feature = "aead-aes128gcm"))]
compile_error!("choose exactly one of `aead-chacha20poly1305` or `aead-aes128gcm`");
#[cfg(not(any(feature = "aead-chacha20poly1305", feature = "aead-aes128gcm")))]
compile_error!("one of `aead-chacha20poly1305` or `aead-aes128gcm` must be enabled");

pub mod aead;
pub mod password;

#[cfg(feature = "legacy-stream-cipher")]
pub mod stream_cipher;

pub use aead::{AeadSession, Direction};
pub use password::derive_key;

/// Length in bytes of the derived key and of the per-session/per-packet salt.
pub const KEY_SIZE: usize = 32;

/// Fills `out` with cryptographically secure random bytes.
#[inline]
pub fn random_bytes(out: &mut [u8]) {
    use rand::RngCore;
    rand::rngs::OsRng.fill_bytes(out);
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("AEAD open failed (authentication or decryption failure)")]
    OpenFailed,
    #[error("HKDF expand failed for requested output length")]
    HkdfExpand,
}
