//! Error types for Tessera core.

use crate::types::LogPageId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Tessera core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tessera_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The transaction was rolled back, for example after a lock timeout.
    #[error("transaction rolled back: {reason}")]
    RolledBack {
        /// Reason for the rollback.
        reason: String,
    },

    /// A committed log page failed verification.
    #[error("transaction corrupted at {page}: {message}")]
    TransactionCorrupted {
        /// The log page that failed.
        page: LogPageId,
        /// Description of the corruption.
        message: String,
    },

    /// Local modify transactions are refused while the log is a slave.
    #[error("storage is a replication slave and is read-only")]
    SlaveReadOnly,

    /// Invalid log format or version.
    #[error("invalid log format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// The log has been closed.
    #[error("log is closed")]
    LogClosed,
}

impl CoreError {
    /// Creates a rolled-back error.
    pub fn rolled_back(reason: impl Into<String>) -> Self {
        Self::RolledBack {
            reason: reason.into(),
        }
    }

    /// Creates a transaction corrupted error.
    pub fn transaction_corrupted(page: LogPageId, message: impl Into<String>) -> Self {
        Self::TransactionCorrupted {
            page,
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true if the error means the log can no longer be trusted.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::TransactionCorrupted { .. })
    }
}
