//! # Tessera Replication Server
//!
//! Master-side administrative endpoint for WAL replication.
//!
//! This crate provides:
//! - [`RequestHandler`]: answers replication requests against any
//!   [`LogStorage`](tessera_core::LogStorage)
//! - [`MasterServer`]: a TCP listener serving each connection on its own thread
//! - [`TokenValidator`]: HMAC-SHA256 replication token checks
//!
//! # Authentication
//!
//! When a secret is configured, every connection must present a valid,
//! unexpired token for this log before any other request is served:
//!
//! ```rust,ignore
//! use tessera_repl_server::{AuthConfig, ServerConfig, TokenValidator};
//!
//! let secret = b"replication-secret".to_vec();
//! let config = ServerConfig::default().with_auth(secret.clone());
//!
//! let validator = TokenValidator::new(AuthConfig::new(secret));
//! let token = validator.create_token(slave_id, log_id)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod server;

pub use auth::{AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler, Session};
pub use server::{MasterServer, ServerHandle};
