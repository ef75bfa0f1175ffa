//! Error types for the replication agent.

use tessera_core::CoreError;
use tessera_repl_protocol::{ErrorCode, ProtocolError};
use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors that can occur while replicating from a master.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Network I/O failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The master sent something the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The local log failed.
    #[error("storage error: {0}")]
    Storage(#[from] CoreError),

    /// The slave log has diverged from the master log.
    #[error("wrong page id: {0}")]
    WrongPageId(String),

    /// The master and slave logs use different page sizes.
    #[error("page size mismatch: slave uses {local} bytes, master sends {remote}")]
    PageSizeMismatch {
        /// Local page size.
        local: usize,
        /// Page size reported by the master.
        remote: usize,
    },

    /// A destination write was not exactly one page.
    #[error("invalid destination write of {len} bytes, expected one {page_size} byte page")]
    InvalidWrite {
        /// Bytes offered.
        len: usize,
        /// The page size.
        page_size: usize,
    },

    /// The master refused the replication token.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The master reported a failure.
    #[error("master error ({code:?}): {message}")]
    Remote {
        /// Error classification.
        code: ErrorCode,
        /// Message from the master.
        message: String,
    },

    /// The master answered with the wrong response.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The local log is no longer a slave.
    #[error("replication stopped: storage is not a slave")]
    SlaveStopped,

    /// The agent was closed.
    #[error("agent closed")]
    Closed,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ReplicationError {
    /// Creates an error from a master error response.
    pub fn from_remote(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::WrongPageId => Self::WrongPageId(message),
            ErrorCode::NotAuthorized => Self::NotAuthorized(message),
            code => Self::Remote { code, message },
        }
    }

    /// Creates an unexpected-response error.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedResponse(message.into())
    }

    /// Returns true if this slave must stop serving.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::WrongPageId(_)
            | Self::PageSizeMismatch { .. }
            | Self::InvalidWrite { .. }
            | Self::InvalidConfig(_) => true,
            Self::Storage(e) => e.is_corruption(),
            _ => false,
        }
    }

    /// Returns true if this error ends replication without a fault.
    pub fn is_stop(&self) -> bool {
        matches!(
            self,
            Self::SlaveStopped | Self::Closed | Self::Storage(CoreError::LogClosed)
        )
    }

    /// Returns true if the next cycle may succeed.
    pub fn is_retryable(&self) -> bool {
        !self.is_fatal() && !self.is_stop()
    }
}
