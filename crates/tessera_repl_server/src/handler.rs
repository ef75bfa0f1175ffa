//! Request handling for the replication endpoint.

use crate::auth::{AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tessera_core::{LogPageId, LogStorage};
use tessera_repl_protocol::{Request, Response};
use tessera_storage::PageHeader;
use uuid::Uuid;

/// Shared state for every connection of one endpoint.
pub struct HandlerContext<S: LogStorage> {
    /// Server configuration.
    pub config: ServerConfig,
    /// The master log being replicated.
    pub storage: Arc<S>,
    validator: Option<TokenValidator>,
}

impl<S: LogStorage> HandlerContext<S> {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, storage: Arc<S>) -> Self {
        let validator = match (&config.auth_secret, config.require_auth) {
            (Some(secret), true) => Some(TokenValidator::new(
                AuthConfig::new(secret.clone()).with_expiry(config.token_expiry),
            )),
            _ => None,
        };
        Self {
            config,
            storage,
            validator,
        }
    }

    /// Returns true if connections must authenticate.
    pub fn requires_auth(&self) -> bool {
        self.validator.is_some()
    }
}

/// Per-connection state.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Remote address, if known.
    pub peer: Option<SocketAddr>,
    /// Slave that authenticated on this connection.
    pub slave_id: Option<Uuid>,
    /// Whether a valid token was presented.
    pub authenticated: bool,
    /// Number of requests served.
    pub requests: u64,
}

impl Session {
    /// Creates a session for a connection from `peer`.
    pub fn new(peer: Option<SocketAddr>) -> Self {
        Self {
            peer,
            ..Self::default()
        }
    }
}

/// Handler for replication requests.
pub struct RequestHandler<S: LogStorage> {
    context: Arc<HandlerContext<S>>,
}

impl<S: LogStorage> Clone for RequestHandler<S> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
        }
    }
}

impl<S: LogStorage> RequestHandler<S> {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext<S>>) -> Self {
        Self { context }
    }

    /// Returns the shared context.
    pub fn context(&self) -> &HandlerContext<S> {
        &self.context
    }

    /// Serves one request, writing the response (and any page bytes) to `out`.
    ///
    /// Request failures are reported to the client as error responses.
    ///
    /// # Errors
    ///
    /// Returns an error only if writing to `out` fails.
    pub fn handle<W: Write>(
        &self,
        session: &mut Session,
        request: Request,
        out: &mut W,
    ) -> ServerResult<()> {
        session.requests += 1;

        if self.context.requires_auth()
            && !session.authenticated
            && !matches!(request, Request::Authenticate { .. })
        {
            tracing::warn!(peer = ?session.peer, "unauthenticated request refused");
            let err = ServerError::NotAuthorized("authenticate first".into());
            return Self::respond_error(&err, out);
        }

        let outcome = match request {
            Request::Authenticate { slave_id, token } => self
                .authenticate(session, slave_id, &token)
                .map(|()| Response::Authenticated),
            Request::CheckLastLog {
                master_log_id,
                slave_next,
                last_trx_id,
                last_page_crc,
            } => self
                .check_last_log(master_log_id, slave_next, last_trx_id, last_page_crc)
                .map(|()| Response::LastLogConfirmed),
            Request::SyncLog { slave_next } => self
                .sync_log(slave_next)
                .map(|next| Response::MasterNext { next }),
            Request::ReadLog { start, max_pages } => {
                return match self.read_log(start, max_pages) {
                    Ok((count, pages)) => {
                        Response::LogPages {
                            start,
                            count,
                            page_size: self.context.storage.page_size() as u32,
                        }
                        .write_to(out)?;
                        out.write_all(&pages)?;
                        out.flush()?;
                        Ok(())
                    }
                    Err(err) => Self::respond_error(&err, out),
                };
            }
        };

        match outcome {
            Ok(response) => Ok(response.write_to(out)?),
            Err(err) => Self::respond_error(&err, out),
        }
    }

    fn respond_error<W: Write>(err: &ServerError, out: &mut W) -> ServerResult<()> {
        if err.is_server_error() {
            tracing::error!(error = %err, "request failed");
        } else {
            tracing::debug!(error = %err, "request rejected");
        }
        Response::error(err.code(), err.to_string()).write_to(out)?;
        Ok(())
    }

    /// Validates a token and marks the session authenticated.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotAuthorized`] if the token is not valid.
    pub fn authenticate(&self, session: &mut Session, slave_id: Uuid, token: &[u8]) -> ServerResult<()> {
        let Some(validator) = &self.context.validator else {
            session.slave_id = Some(slave_id);
            session.authenticated = true;
            return Ok(());
        };

        let log_id = self.context.storage.log_info()?.replication_log_id();
        validator.validate_token(token, slave_id, log_id)?;
        session.slave_id = Some(slave_id);
        session.authenticated = true;
        tracing::info!(%slave_id, peer = ?session.peer, "slave authenticated");
        Ok(())
    }

    /// Confirms that the slave's last page matches this log.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::WrongPageId`] if the slave replicates another
    /// log, is ahead of this log, or its last page differs from ours.
    pub fn check_last_log(
        &self,
        master_log_id: Uuid,
        slave_next: u64,
        last_trx_id: Option<u64>,
        last_page_crc: Option<u32>,
    ) -> ServerResult<()> {
        let storage = &self.context.storage;
        let info = storage.log_info()?;

        if master_log_id != info.replication_log_id() {
            return Err(ServerError::WrongPageId(format!(
                "slave replicates log {master_log_id}, this is {}",
                info.replication_log_id()
            )));
        }
        let slave_next = LogPageId(slave_next);
        if slave_next > info.next {
            return Err(ServerError::WrongPageId(format!(
                "slave at {slave_next} is ahead of master at {}",
                info.next
            )));
        }
        if slave_next < info.start {
            return Err(ServerError::WrongPageId(format!(
                "slave at {slave_next} is behind the log start {}",
                info.start
            )));
        }
        if slave_next == info.start {
            return Ok(());
        }

        let (Some(trx_id), Some(crc)) = (last_trx_id, last_page_crc) else {
            return Err(ServerError::InvalidRequest(
                "last page trx id and crc are required for a non-empty slave".into(),
            ));
        };

        let last = LogPageId(slave_next.0 - 1);
        let mut page = vec![0u8; storage.page_size()];
        storage.admin_log_read(last, &mut page, 1)?;
        let header = PageHeader::decode(&page).map_err(|e| ServerError::Internal(e.to_string()))?;
        if header.trx_id != trx_id || header.crc != crc {
            return Err(ServerError::WrongPageId(format!(
                "page {last} differs: master has trx {} crc {:08x}, slave has trx {trx_id} crc {crc:08x}",
                header.trx_id, header.crc
            )));
        }
        Ok(())
    }

    /// Returns this log's next page id.
    ///
    /// # Errors
    ///
    /// Returns an error if the log is closed.
    pub fn sync_log(&self, slave_next: u64) -> ServerResult<u64> {
        let next = self.context.storage.log_info()?.next.0;
        tracing::debug!(slave_next, master_next = next, "sync requested");
        Ok(next)
    }

    /// Reads up to `max_pages` committed pages starting at `start`, capped by
    /// the configured per-read limit. Returns the page count and bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidRequest`] if `start` is outside the log.
    pub fn read_log(&self, start: u64, max_pages: u32) -> ServerResult<(u32, Vec<u8>)> {
        let storage = &self.context.storage;
        let info = storage.log_info()?;
        let start = LogPageId(start);
        if start < info.start || start > info.next {
            return Err(ServerError::InvalidRequest(format!(
                "read from {start} outside {}..{}",
                info.start, info.next
            )));
        }

        let available = info.next.distance_from(start);
        let count = u64::from(max_pages.min(self.context.config.max_pages_per_read)).min(available);
        let count = count as usize;

        let mut pages = vec![0u8; count * storage.page_size()];
        storage.admin_log_read(start, &mut pages, count)?;
        Ok((count as u32, pages))
    }
}
