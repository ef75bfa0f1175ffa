//! Error types for the replication protocol.

use std::io;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or transporting frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The frame CRC does not match its contents.
    #[error("frame checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// CRC stored in the frame.
        expected: u32,
        /// CRC computed over the frame.
        actual: u32,
    },

    /// The declared payload length exceeds the limit.
    #[error("frame of {len} bytes exceeds the maximum of {max}")]
    FrameTooLarge {
        /// Declared length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// The frame kind is unknown or does not match its payload.
    #[error("unexpected frame kind 0x{0:02x}")]
    UnexpectedKind(u8),

    /// CBOR encoding failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// CBOR decoding failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// An auth token is malformed or its signature does not verify.
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

impl ProtocolError {
    /// Returns true if the stream is unusable after this error.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ChecksumMismatch { .. } | Self::FrameTooLarge { .. })
    }
}
