//! Legacy stream-cipher construction: AES-256 in CTR mode with a 128-bit
//! IV, kept only for interoperability with older clients. Gated behind the `legacy-stream-cipher` feature and off by
//! default, a new deployment should prefer the AEAD path.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher as _};

use crate::KEY_SIZE;

pub const IV_SIZE: usize = 16;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// One direction of the legacy stream. Each side (read/write) owns an
/// independent instance; neither side's counter is ever shared.
pub struct StreamCipherState {
    cipher: Aes256Ctr,
}

impl StreamCipherState {
    /// Constructs a cipher state for a freshly generated (write side) or
    /// freshly received (read side) IV.
    #[inline]
    pub fn new(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> StreamCipherState {
        StreamCipherState {
            cipher: Aes256Ctr::new(key.into(), iv.into()),
        }
    }

    /// Applies the keystream to `buf` in place. CTR mode is its own
    /// inverse: the same call encrypts plaintext or decrypts ciphertext.
    #[inline]
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.cipher.apply_keystream(buf);
    }
}
