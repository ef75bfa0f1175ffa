//! Replication tokens.
//!
//! A token binds a slave to the log it replicates:
//!
//! - 16 bytes: slave id
//! - 16 bytes: log id
//! - 8 bytes: issue time (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 over the preceding 40 bytes
//!
//! Master and slave share the HMAC secret. Expiry is the verifier's policy.

use crate::error::{ProtocolError, ProtocolResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Encoded token length in bytes.
pub const TOKEN_LEN: usize = 72;

const SIGNED_LEN: usize = 40;

/// A decoded, signature-checked token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationToken {
    /// Slave the token was issued to.
    pub slave_id: Uuid,
    /// Log the slave may replicate.
    pub log_id: Uuid,
    /// Issue time in Unix milliseconds.
    pub issued_at_ms: u64,
}

/// Issues and verifies tokens with a shared secret.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl TokenSigner {
    /// Creates a signer for `secret`.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Issues a token for `slave_id` to replicate `log_id`, stamped now.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is unusable as an HMAC key.
    pub fn issue(&self, slave_id: Uuid, log_id: Uuid) -> ProtocolResult<Vec<u8>> {
        self.issue_at(slave_id, log_id, now_millis())
    }

    /// Issues a token with an explicit issue time.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is unusable as an HMAC key.
    pub fn issue_at(&self, slave_id: Uuid, log_id: Uuid, issued_at_ms: u64) -> ProtocolResult<Vec<u8>> {
        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.extend_from_slice(slave_id.as_bytes());
        token.extend_from_slice(log_id.as_bytes());
        token.extend_from_slice(&issued_at_ms.to_be_bytes());

        let signature = self.sign(&token)?;
        token.extend_from_slice(&signature);
        Ok(token)
    }

    /// Checks the token's length and signature and decodes it.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidToken`] if the token is malformed or
    /// was not signed with this secret.
    pub fn verify(&self, token: &[u8]) -> ProtocolResult<ReplicationToken> {
        if token.len() != TOKEN_LEN {
            return Err(ProtocolError::InvalidToken(format!(
                "expected {TOKEN_LEN} bytes, got {}",
                token.len()
            )));
        }

        let mut mac = self.mac()?;
        mac.update(&token[..SIGNED_LEN]);
        mac.verify_slice(&token[SIGNED_LEN..])
            .map_err(|_| ProtocolError::InvalidToken("signature mismatch".into()))?;

        let mut slave = [0u8; 16];
        slave.copy_from_slice(&token[0..16]);
        let mut log = [0u8; 16];
        log.copy_from_slice(&token[16..32]);
        let mut issued = [0u8; 8];
        issued.copy_from_slice(&token[32..40]);

        Ok(ReplicationToken {
            slave_id: Uuid::from_bytes(slave),
            log_id: Uuid::from_bytes(log),
            issued_at_ms: u64::from_be_bytes(issued),
        })
    }

    fn mac(&self) -> ProtocolResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ProtocolError::InvalidToken(format!("unusable secret: {e}")))
    }

    fn sign(&self, data: &[u8]) -> ProtocolResult<[u8; 32]> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().into())
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

/// Returns the current time in Unix milliseconds.
#[must_use]
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
