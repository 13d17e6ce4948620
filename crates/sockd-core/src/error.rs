//! The tagged error set `sockd` surfaces from its public API.
//!
//! `RateLimited` and `PolicyRejected` deliberately do not appear here:
//! both are handled entirely locally (logged, connection dropped) and
//! never escape the handler as a propagated error.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum SockError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("failed to bind listener: {0}")]
    BindFailed(#[source] io::Error),

    #[error("failed to resolve destination: {0}")]
    ResolveFailed(String),

    #[error("AEAD/stream decryption failed")]
    DecryptFailed,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("malformed destination header: {0}")]
    MalformedHeader(String),

    #[error("failed to dial upstream: {0}")]
    UpstreamDialFailed(#[source] io::Error),

    #[error("failed to resolve upstream name: {0}")]
    UpstreamResolveFailed(String),

    #[error("sub-daemon is in emergency lockdown")]
    LockedDown,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<sockd_crypto::CryptoError> for SockError {
    #[inline]
    fn from(_: sockd_crypto::CryptoError) -> Self {
        SockError::DecryptFailed
    }
}

impl From<sockd_proto::FrameError> for SockError {
    #[inline]
    fn from(err: sockd_proto::FrameError) -> Self {
        match err {
            sockd_proto::FrameError::Open(_) => SockError::DecryptFailed,
            sockd_proto::FrameError::InvalidLength(len) => {
                SockError::MalformedFrame(format!("invalid length {len}"))
            }
            sockd_proto::FrameError::Io(io_err) => SockError::Io(io_err),
        }
    }
}

impl From<sockd_proto::AddressCodecError> for SockError {
    #[inline]
    fn from(err: sockd_proto::AddressCodecError) -> Self {
        SockError::MalformedHeader(err.to_string())
    }
}

pub type SockResult<T> = Result<T, SockError>;
