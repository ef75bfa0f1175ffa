//! TCP listener for the replication endpoint.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler, Session};
use parking_lot::Mutex;
use socket2::{SockRef, TcpKeepalive};
use std::collections::HashMap;
use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tessera_core::LogStorage;
use tessera_repl_protocol::{ErrorCode, ProtocolError, Request, Response};

/// Idle time before the first keep-alive probe on a replication socket.
const KEEPALIVE_TIME: Duration = Duration::from_secs(60);

/// Applies the replication socket options: nodelay, keep-alive and no read
/// timeout.
fn configure_socket(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(None)?;
    SockRef::from(stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_TIME))
}

/// Master replication server.
///
/// Each accepted connection is served on its own thread. Requests on one
/// connection are answered strictly in order.
pub struct MasterServer<S: LogStorage + 'static> {
    handler: RequestHandler<S>,
}

impl<S: LogStorage + 'static> MasterServer<S> {
    /// Creates a server for `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: ServerConfig, storage: Arc<S>) -> ServerResult<Self> {
        config.validate()?;
        let context = Arc::new(HandlerContext::new(config, storage));
        Ok(Self {
            handler: RequestHandler::new(context),
        })
    }

    /// Returns the request handler.
    pub fn handler(&self) -> &RequestHandler<S> {
        &self.handler
    }

    /// Binds the configured address and starts accepting connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub fn start(self) -> ServerResult<ServerHandle> {
        let listener = TcpListener::bind(self.handler.context().config.bind_addr)?;
        let local_addr = listener.local_addr()?;
        let shared = Arc::new(Shared::default());

        tracing::info!(%local_addr, "replication server listening");

        let accept_shared = Arc::clone(&shared);
        let handler = self.handler;
        let accept = thread::Builder::new()
            .name("tessera-repl-accept".into())
            .spawn(move || accept_loop(&listener, &handler, &accept_shared))?;

        Ok(ServerHandle {
            local_addr,
            shared,
            accept: Some(accept),
        })
    }
}

#[derive(Default)]
struct Shared {
    stopping: AtomicBool,
    active: AtomicUsize,
    next_id: AtomicU64,
    connections: Mutex<HashMap<u64, TcpStream>>,
}

fn accept_loop<S: LogStorage + 'static>(
    listener: &TcpListener,
    handler: &RequestHandler<S>,
    shared: &Arc<Shared>,
) {
    let max_connections = handler.context().config.max_connections;

    for stream in listener.incoming() {
        if shared.stopping.load(Ordering::Acquire) {
            break;
        }
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let peer = stream.peer_addr().ok();

        if shared.active.load(Ordering::Acquire) >= max_connections {
            tracing::warn!(?peer, max_connections, "connection limit reached");
            let refusal = Response::error(ErrorCode::Internal, "too many connections");
            let _ = refusal.write_to(&mut stream);
            continue;
        }

        if let Err(e) = configure_socket(&stream) {
            tracing::warn!(?peer, error = %e, "failed to configure connection");
        }
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        match stream.try_clone() {
            Ok(clone) => {
                shared.connections.lock().insert(id, clone);
            }
            Err(e) => {
                tracing::warn!(?peer, error = %e, "failed to register connection");
                continue;
            }
        }
        shared.active.fetch_add(1, Ordering::AcqRel);

        let handler = handler.clone();
        let conn_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name(format!("tessera-repl-conn-{id}"))
            .spawn(move || {
                serve_connection(stream, peer, &handler);
                conn_shared.connections.lock().remove(&id);
                conn_shared.active.fetch_sub(1, Ordering::AcqRel);
            });
        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to spawn connection thread");
            shared.connections.lock().remove(&id);
            shared.active.fetch_sub(1, Ordering::AcqRel);
        }
    }

    tracing::info!("replication server stopped accepting");
}

fn serve_connection<S: LogStorage>(
    stream: TcpStream,
    peer: Option<SocketAddr>,
    handler: &RequestHandler<S>,
) {
    tracing::debug!(?peer, "connection opened");
    let read_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(?peer, error = %e, "failed to clone stream");
            return;
        }
    };
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(stream);
    let mut session = Session::new(peer);

    loop {
        let request = match Request::read_from(&mut reader) {
            Ok(request) => request,
            Err(ProtocolError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) if e.is_connection_error() => {
                tracing::debug!(?peer, error = %e, "connection dropped");
                break;
            }
            Err(e) => {
                tracing::warn!(?peer, error = %e, "malformed request");
                let response = Response::error(ErrorCode::InvalidRequest, e.to_string());
                if response.write_to(&mut writer).is_err() {
                    break;
                }
                continue;
            }
        };

        if let Err(e) = handler.handle(&mut session, request, &mut writer) {
            tracing::debug!(?peer, error = %e, "failed to write response");
            break;
        }
    }

    tracing::debug!(?peer, requests = session.requests, "connection closed");
}

/// Handle to a running [`MasterServer`].
///
/// Dropping the handle stops the server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    accept: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the number of connections being served.
    pub fn active_connections(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Stops accepting connections and closes open ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the accept thread panicked.
    pub fn shutdown(mut self) -> ServerResult<()> {
        self.stop()
    }

    fn stop(&mut self) -> ServerResult<()> {
        let Some(accept) = self.accept.take() else {
            return Ok(());
        };
        self.shared.stopping.store(true, Ordering::Release);
        // Wake the blocking accept.
        let _ = TcpStream::connect(self.local_addr);
        for (_, stream) in self.shared.connections.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        accept
            .join()
            .map_err(|_| ServerError::Internal("accept thread panicked".into()))
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!(error = %e, "server shutdown failed");
        }
    }
}
