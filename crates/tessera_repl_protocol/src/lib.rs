//! # Tessera Replication Protocol
//!
//! Wire contract between a slave's replication agent and its master's
//! administrative endpoint. This crate is pure: it defines messages, framing
//! and auth tokens but opens no sockets.
//!
//! ## Exchange
//!
//! ```text
//! slave                                   master
//!   │── Authenticate { slave_id, token } ──▶│   (when auth is enabled)
//!   │◀────────────── Authenticated ─────────│
//!   │── CheckLastLog { .. } ───────────────▶│
//!   │◀────────── LastLogConfirmed ──────────│   or Error { WrongPageId }
//!   │── SyncLog { slave_next } ────────────▶│
//!   │◀────────── MasterNext { next } ───────│
//!   │── ReadLog { start, max_pages } ──────▶│
//!   │◀── LogPages { start, count, .. } ─────│
//!   │◀── count * page_size raw bytes ───────│
//! ```
//!
//! Every message travels in a frame: `[kind u8][length u32 LE][CBOR][crc32 u32 LE]`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod error;
mod frame;
mod messages;

pub use auth::{ReplicationToken, TokenSigner, TOKEN_LEN};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{read_frame, write_frame, FRAME_OVERHEAD, MAX_FRAME_LEN};
pub use messages::{ErrorCode, Request, Response};

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;
