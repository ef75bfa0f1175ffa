//! Connections to the master's replication endpoint.

use crate::error::{ReplicationError, ReplicationResult};
use parking_lot::Mutex;
use socket2::{SockRef, TcpKeepalive};
use std::io::{BufReader, BufWriter, Read};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{LogInfo, LogPageId, TrxId};
use tessera_repl_protocol::{Request, Response, TokenSigner};
use uuid::Uuid;

/// Header of a page run returned by [`MasterClient::read_log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRun {
    /// Log page id of the first page.
    pub start: LogPageId,
    /// Number of pages to read with [`MasterClient::read_page`].
    pub count: u32,
    /// Size of every page.
    pub page_size: usize,
}

/// Identity of the slave's last log page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastPage {
    /// Transaction that wrote the page.
    pub trx_id: TrxId,
    /// Body CRC from the page header.
    pub crc: u32,
}

/// An open connection to a master.
pub trait MasterClient: Send {
    /// Asks the master to confirm the page before `slave_next`.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::WrongPageId`] if the master's log differs.
    fn check_last_log(
        &mut self,
        master_log_id: Uuid,
        slave_next: LogPageId,
        last: Option<LastPage>,
    ) -> ReplicationResult<()>;

    /// Returns the master's next log page id.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    fn sync_log(&mut self, slave_next: LogPageId) -> ReplicationResult<LogPageId>;

    /// Starts reading up to `max_pages` pages at `start`.
    ///
    /// Exactly `count` calls to [`MasterClient::read_page`] must follow
    /// before the next request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    fn read_log(&mut self, start: LogPageId, max_pages: u32) -> ReplicationResult<PageRun>;

    /// Reads the next page of the current run into `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if no run is in progress or the read fails.
    fn read_page(&mut self, buf: &mut [u8]) -> ReplicationResult<()>;

    /// Returns a handle that aborts this connection from another thread.
    fn abort_handle(&self) -> AbortHandle;
}

/// Opens connections to a master.
pub trait Connector: Send + Sync {
    /// The connection type.
    type Client: MasterClient;

    /// Connects on behalf of a slave whose current log state is `info`.
    ///
    /// # Errors
    ///
    /// Returns an error if the master cannot be reached or refuses the slave.
    fn connect(&self, info: &LogInfo) -> ReplicationResult<Self::Client>;
}

/// Aborts a connection from another thread.
///
/// In-flight reads on an aborted TCP connection fail immediately.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortInner>,
}

#[derive(Debug, Default)]
struct AbortInner {
    aborted: AtomicBool,
    stream: Mutex<Option<TcpStream>>,
}

impl AbortHandle {
    /// Creates a handle that only records the abort.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handle that also shuts `stream` down.
    pub fn for_stream(stream: TcpStream) -> Self {
        let handle = Self::default();
        *handle.inner.stream.lock() = Some(stream);
        handle
    }

    /// Aborts the connection.
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::Release);
        if let Some(stream) = self.inner.stream.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Returns true once [`AbortHandle::abort`] has been called.
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Fails with [`ReplicationError::Closed`] if aborted.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::Closed`] once aborted.
    pub fn check(&self) -> ReplicationResult<()> {
        if self.is_aborted() {
            Err(ReplicationError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Idle time before the first keep-alive probe on a master connection.
const KEEPALIVE_TIME: Duration = Duration::from_secs(60);

fn configure_stream(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(None)?;
    SockRef::from(stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_TIME))
}

/// Connects to a master over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    slave_id: Uuid,
    signer: Option<TokenSigner>,
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Creates a connector for the master at `addr` (`host:port`).
    pub fn new(addr: impl Into<String>, slave_id: Uuid) -> Self {
        Self {
            addr: addr.into(),
            slave_id,
            signer: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Creates a connector from a slave configuration.
    pub fn from_config(config: &crate::SlaveConfig) -> Self {
        let connector = Self::new(config.master_addr(), config.slave_id)
            .with_connect_timeout(config.connect_timeout);
        match &config.auth_secret {
            Some(secret) => connector.with_auth(secret.clone()),
            None => connector,
        }
    }

    /// Authenticates every connection with tokens signed by `secret`.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.signer = Some(TokenSigner::new(secret));
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn open_stream(&self) -> ReplicationResult<TcpStream> {
        let mut last_error = None;
        for addr in self.addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error
            .unwrap_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("no address for {}", self.addr),
                )
            })
            .into())
    }
}

impl Connector for TcpConnector {
    type Client = TcpMasterClient;

    fn connect(&self, info: &LogInfo) -> ReplicationResult<TcpMasterClient> {
        let stream = self.open_stream()?;
        configure_stream(&stream)?;
        tracing::debug!(master = %self.addr, local = ?stream.local_addr().ok(), "connected to master");

        let mut client = TcpMasterClient::new(stream)?;
        if let Some(signer) = &self.signer {
            let token = signer.issue(self.slave_id, info.replication_log_id())?;
            client.call(&Request::Authenticate {
                slave_id: self.slave_id,
                token,
            })
            .and_then(|response| match response {
                Response::Authenticated => Ok(()),
                other => Err(ReplicationError::unexpected(format!(
                    "expected Authenticated, got {other:?}"
                ))),
            })?;
        }
        Ok(client)
    }
}

/// A [`MasterClient`] over one TCP connection.
pub struct TcpMasterClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    abort: AbortHandle,
    remaining: u32,
    page_size: usize,
}

impl TcpMasterClient {
    /// Wraps a connected stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be cloned.
    pub fn new(stream: TcpStream) -> ReplicationResult<Self> {
        let abort = AbortHandle::for_stream(stream.try_clone()?);
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
            abort,
            remaining: 0,
            page_size: 0,
        })
    }

    fn call(&mut self, request: &Request) -> ReplicationResult<Response> {
        self.abort.check()?;
        if self.remaining != 0 {
            return Err(ReplicationError::unexpected(format!(
                "{} pages of the previous run are unread",
                self.remaining
            )));
        }
        request.write_to(&mut self.writer)?;
        match Response::read_from(&mut self.reader)? {
            Response::Error { code, message } => Err(ReplicationError::from_remote(code, message)),
            response => Ok(response),
        }
    }
}

impl MasterClient for TcpMasterClient {
    fn check_last_log(
        &mut self,
        master_log_id: Uuid,
        slave_next: LogPageId,
        last: Option<LastPage>,
    ) -> ReplicationResult<()> {
        let request = Request::CheckLastLog {
            master_log_id,
            slave_next: slave_next.0,
            last_trx_id: last.map(|p| p.trx_id.0),
            last_page_crc: last.map(|p| p.crc),
        };
        match self.call(&request)? {
            Response::LastLogConfirmed => Ok(()),
            other => Err(ReplicationError::unexpected(format!(
                "expected LastLogConfirmed, got {other:?}"
            ))),
        }
    }

    fn sync_log(&mut self, slave_next: LogPageId) -> ReplicationResult<LogPageId> {
        match self.call(&Request::SyncLog {
            slave_next: slave_next.0,
        })? {
            Response::MasterNext { next } => Ok(LogPageId(next)),
            other => Err(ReplicationError::unexpected(format!(
                "expected MasterNext, got {other:?}"
            ))),
        }
    }

    fn read_log(&mut self, start: LogPageId, max_pages: u32) -> ReplicationResult<PageRun> {
        let response = self.call(&Request::ReadLog {
            start: start.0,
            max_pages,
        })?;
        let Response::LogPages {
            start: run_start,
            count,
            page_size,
        } = response
        else {
            return Err(ReplicationError::unexpected(format!(
                "expected LogPages, got {response:?}"
            )));
        };
        if run_start != start.0 || count > max_pages {
            return Err(ReplicationError::unexpected(format!(
                "asked for {max_pages} pages at {start}, got {count} at {run_start}"
            )));
        }
        self.remaining = count;
        self.page_size = page_size as usize;
        Ok(PageRun {
            start,
            count,
            page_size: self.page_size,
        })
    }

    fn read_page(&mut self, buf: &mut [u8]) -> ReplicationResult<()> {
        self.abort.check()?;
        if self.remaining == 0 {
            return Err(ReplicationError::unexpected("no page run in progress"));
        }
        if buf.len() != self.page_size {
            return Err(ReplicationError::PageSizeMismatch {
                local: buf.len(),
                remote: self.page_size,
            });
        }
        self.reader.read_exact(buf)?;
        self.remaining -= 1;
        Ok(())
    }

    fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}
