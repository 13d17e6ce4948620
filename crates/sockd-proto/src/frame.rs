//! Encrypted framing over a TCP byte stream.
//!
//! A two-part length+payload AEAD frame: a sealed 2-byte length prefix
//! (14-bit mask) followed by a sealed payload of that length, each with
//! its own independent nonce tick.

use std::io::{self, Read, Write};

use sockd_crypto::aead::{AeadSession, Direction, MAC_SIZE};
use sockd_crypto::KEY_SIZE;

/// Maximum plaintext payload per frame: a 14-bit length mask.
pub const MAX_PAYLOAD: usize = 0x3FFF;
const LENGTH_MASK: u16 = 0x3FFF;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("AEAD open failed")]
    Open(#[from] sockd_crypto::CryptoError),
    #[error("frame length {0} is zero or exceeds the 14-bit mask")]
    InvalidLength(u16),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Generates a fresh random salt and constructs the matching `AeadSession`,
/// returning both so the caller can write the salt as the first 32 bytes
/// of the stream.
pub fn new_session(derived_key: &[u8; KEY_SIZE], direction: Direction) -> (Vec<u8>, AeadSession) {
    let mut salt = vec![0u8; KEY_SIZE];
    sockd_crypto::random_bytes(&mut salt);
    let session = AeadSession::new(derived_key, &salt, direction).expect("HKDF expand cannot fail for a fixed-size key");
    (salt, session)
}

/// Reads `buf.len()` bytes from `reader`, distinguishing a clean EOF
/// (zero bytes consumed) from a partial read followed by EOF (a real
/// error, the peer closed mid-frame). Returns `Ok(true)` if `buf` was
/// fully filled, `Ok(false)` on a clean EOF.
fn read_full_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Wraps a reader with frame decryption, buffering the decrypted payload
/// of one frame at a time. One frame is read per call to `read_frame`,
/// independent of how the underlying transport chunks its bytes; the
/// `io::Read` impl below additionally buffers any excess plaintext for
/// the next call.
pub struct FrameReader<R> {
    inner: R,
    session: AeadSession,
    pending: Vec<u8>,
    pending_pos: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, session: AeadSession) -> FrameReader<R> {
        FrameReader {
            inner,
            session,
            pending: Vec::new(),
            pending_pos: 0,
        }
    }

    /// Reads and decrypts exactly the next frame's payload, ignoring any
    /// buffered leftover from a previous partial `Read::read` call. Any
    /// failure (I/O error, open failure, or invalid length) is
    /// terminal: the reader must not be used again.
    pub fn read_frame(&mut self) -> Result<Vec<u8>, FrameError> {
        self.decode_one_frame()?.ok_or_else(|| FrameError::Io(io::ErrorKind::UnexpectedEof.into()))
    }

    /// Decodes one frame, returning `Ok(None)` on a clean EOF before any
    /// frame bytes were read (the peer closed the connection cleanly
    /// between frames).
    fn decode_one_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut sealed_len = vec![0u8; 2 + MAC_SIZE];
        if !read_full_or_eof(&mut self.inner, &mut sealed_len)? {
            return Ok(None);
        }
        self.session.open(&mut sealed_len)?;

        let raw_len = u16::from_be_bytes([sealed_len[0], sealed_len[1]]);
        let len = raw_len & LENGTH_MASK;
        if len == 0 || len != raw_len {
            return Err(FrameError::InvalidLength(raw_len));
        }

        let mut sealed_payload = vec![0u8; len as usize + MAC_SIZE];
        self.inner.read_exact(&mut sealed_payload)?;
        self.session.open(&mut sealed_payload)?;

        Ok(Some(sealed_payload))
    }
}

impl<R: Read> Read for FrameReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending_pos >= self.pending.len() {
            match self.decode_one_frame() {
                Ok(Some(frame)) => {
                    self.pending = frame;
                    self.pending_pos = 0;
                }
                Ok(None) => return Ok(0),
                Err(FrameError::Io(e)) => return Err(e),
                Err(other) => return Err(io::Error::new(io::ErrorKind::InvalidData, other)),
            }
        }

        let available = &self.pending[self.pending_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pending_pos += n;
        Ok(n)
    }
}

/// Wraps a writer with frame encryption. Accepts arbitrarily large writes,
/// internally slicing into `MAX_PAYLOAD`-sized chunks.
pub struct FrameWriter<W> {
    inner: W,
    session: AeadSession,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W, session: AeadSession) -> FrameWriter<W> {
        FrameWriter { inner, session }
    }

    /// Encrypts and writes `data`, chunked into frames of at most
    /// `MAX_PAYLOAD` bytes each.
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), FrameError> {
        for chunk in data.chunks(MAX_PAYLOAD) {
            self.write_frame(chunk)?;
        }
        Ok(())
    }

    fn write_frame(&mut self, chunk: &[u8]) -> Result<(), FrameError> {
        debug_assert!(chunk.len() <= MAX_PAYLOAD);

        let mut sealed_len = (chunk.len() as u16).to_be_bytes().to_vec();
        self.session.seal(&mut sealed_len)?;

        let mut sealed_payload = chunk.to_vec();
        self.session.seal(&mut sealed_payload)?;

        self.inner.write_all(&sealed_len)?;
        self.inner.write_all(&sealed_payload)?;
        Ok(())
    }

    #[inline]
    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
