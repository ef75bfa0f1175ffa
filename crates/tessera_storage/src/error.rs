//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// Another handle holds the exclusive lock on the underlying file.
    #[error("storage locked: another process has exclusive access")]
    Locked,

    /// A page buffer has the wrong size or an impossible header.
    #[error("invalid page: {0}")]
    InvalidPage(String),

    /// A page body does not match the CRC recorded in its header.
    #[error("page {page_id} checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// The page id found in the header.
        page_id: u64,
        /// CRC stored in the header.
        expected: u32,
        /// CRC computed over the body.
        actual: u32,
    },
}
