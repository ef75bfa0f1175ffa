//! Authentication support for the replication server.
//!
//! Tokens are issued and signed by
//! [`TokenSigner`](tessera_repl_protocol::TokenSigner); this module adds the
//! server's policy: the token must name this log and must not be expired.

use crate::error::{ServerError, ServerResult};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tessera_repl_protocol::{ReplicationToken, TokenSigner};
use uuid::Uuid;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Token validator for incoming connections.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    signer: TokenSigner,
    expiry: Duration,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self {
            signer: TokenSigner::new(config.secret),
            expiry: config.token_expiry,
        }
    }

    /// Creates a token allowing `slave_id` to replicate `log_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret cannot key the HMAC.
    pub fn create_token(&self, slave_id: Uuid, log_id: Uuid) -> ServerResult<Vec<u8>> {
        Ok(self.signer.issue(slave_id, log_id)?)
    }

    /// Validates a token presented by `slave_id` for `log_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotAuthorized`] if the token is malformed,
    /// forged, issued to another slave or log, or expired.
    pub fn validate_token(
        &self,
        token: &[u8],
        slave_id: Uuid,
        log_id: Uuid,
    ) -> ServerResult<ReplicationToken> {
        let decoded = self
            .signer
            .verify(token)
            .map_err(|e| ServerError::NotAuthorized(e.to_string()))?;

        if decoded.slave_id != slave_id {
            return Err(ServerError::NotAuthorized("slave id mismatch".into()));
        }
        if decoded.log_id != log_id {
            return Err(ServerError::NotAuthorized("log id mismatch".into()));
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let expiry_millis = self.expiry.as_millis() as u64;
        if now > decoded.issued_at_ms.saturating_add(expiry_millis) {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }

        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TokenValidator {
        TokenValidator::new(AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()))
    }

    #[test]
    fn create_and_validate_token() {
        let slave = Uuid::new_v4();
        let log = Uuid::new_v4();
        let token = validator().create_token(slave, log).unwrap();
        let decoded = validator().validate_token(&token, slave, log).unwrap();
        assert_eq!(decoded.slave_id, slave);
    }

    #[test]
    fn reject_wrong_slave() {
        let log = Uuid::new_v4();
        let token = validator().create_token(Uuid::new_v4(), log).unwrap();
        assert!(validator()
            .validate_token(&token, Uuid::new_v4(), log)
            .is_err());
    }

    #[test]
    fn reject_wrong_log() {
        let slave = Uuid::new_v4();
        let token = validator().create_token(slave, Uuid::new_v4()).unwrap();
        assert!(validator()
            .validate_token(&token, slave, Uuid::new_v4())
            .is_err());
    }

    #[test]
    fn reject_expired() {
        let secret = b"secret".to_vec();
        let validator = TokenValidator::new(AuthConfig::new(secret.clone()).with_expiry(Duration::from_secs(1)));
        let slave = Uuid::new_v4();
        let log = Uuid::new_v4();
        let token = TokenSigner::new(secret).issue_at(slave, log, 1_000).unwrap();
        assert!(matches!(
            validator.validate_token(&token, slave, log),
            Err(ServerError::NotAuthorized(_))
        ));
    }
}
