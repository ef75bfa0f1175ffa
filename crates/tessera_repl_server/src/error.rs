//! Error types for the replication server.

use tessera_core::CoreError;
use tessera_repl_protocol::{ErrorCode, ProtocolError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the replication server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The connection is not authorized.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The slave's log does not match this log.
    #[error("wrong page id: {0}")]
    WrongPageId(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Log storage error.
    #[error("storage error: {0}")]
    Core(#[from] CoreError),

    /// Wire protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if the client caused the error.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::NotAuthorized(_)
                | ServerError::WrongPageId(_)
        )
    }

    /// Returns true if the server failed.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::Core(_)
                | ServerError::Internal(_)
                | ServerError::Io(_)
                | ServerError::InvalidConfig(_)
        )
    }

    /// Returns the wire error code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::WrongPageId(_) => ErrorCode::WrongPageId,
            ServerError::NotAuthorized(_) => ErrorCode::NotAuthorized,
            ServerError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            _ => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::WrongPageId("diverged".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
    }

    #[test]
    fn error_codes() {
        assert_eq!(
            ServerError::WrongPageId("x".into()).code(),
            ErrorCode::WrongPageId
        );
        assert_eq!(
            ServerError::Core(CoreError::LogClosed).code(),
            ErrorCode::Internal
        );
    }
}
