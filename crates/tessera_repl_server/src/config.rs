//! Server configuration.

use crate::error::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the replication endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum number of pages returned by one read.
    pub max_pages_per_read: u32,
    /// Whether to require authentication.
    pub require_auth: bool,
    /// Secret key for token validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// How long an issued token stays valid.
    pub token_expiry: Duration,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 64,
            max_pages_per_read: 256,
            require_auth: false,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the maximum concurrent connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the maximum number of pages per read.
    pub fn with_max_pages_per_read(mut self, pages: u32) -> Self {
        self.max_pages_per_read = pages;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token expiry.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidConfig`] describing the first bad value.
    pub fn validate(&self) -> ServerResult<()> {
        if self.max_connections == 0 {
            return Err(ServerError::InvalidConfig(
                "max_connections must be at least 1".into(),
            ));
        }
        if self.max_pages_per_read == 0 {
            return Err(ServerError::InvalidConfig(
                "max_pages_per_read must be at least 1".into(),
            ));
        }
        if self.require_auth && self.auth_secret.as_ref().map_or(true, Vec::is_empty) {
            return Err(ServerError::InvalidConfig(
                "authentication requires a non-empty secret".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 7470)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 64);
        assert!(!config.require_auth);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_max_connections(8)
            .with_max_pages_per_read(16)
            .with_auth(vec![1, 2, 3, 4]);

        assert_eq!(config.max_connections, 8);
        assert_eq!(config.max_pages_per_read, 16);
        assert!(config.require_auth);
        assert_eq!(config.auth_secret, Some(vec![1, 2, 3, 4]));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation() {
        assert!(ServerConfig::default()
            .with_max_connections(0)
            .validate()
            .is_err());
        assert!(ServerConfig::default()
            .with_max_pages_per_read(0)
            .validate()
            .is_err());
        assert!(ServerConfig::default().with_auth(Vec::new()).validate().is_err());
    }
}
