//! In-process replication transport.
//!
//! Requests are served by a [`RequestHandler`] on the calling thread and
//! responses are decoded from the exact bytes the TCP server would send.

use crate::fixtures::ReplicaPair;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tessera_core::{LogInfo, LogPageId, PagedLog};
use tessera_repl_agent::{
    AbortHandle, Connector, LastPage, MasterClient, PageRun, ReplicationAgent, ReplicationError,
    ReplicationResult, SlaveConfig,
};
use tessera_repl_protocol::{Request, Response};
use tessera_repl_server::{HandlerContext, RequestHandler, ServerConfig, Session};
use uuid::Uuid;

/// A [`MasterClient`] that calls a request handler directly.
pub struct LoopbackClient {
    handler: RequestHandler<PagedLog>,
    session: Session,
    stream: Cursor<Vec<u8>>,
    remaining: u32,
    abort: AbortHandle,
}

impl LoopbackClient {
    /// Creates a client for `handler`.
    pub fn new(handler: RequestHandler<PagedLog>) -> Self {
        Self {
            handler,
            session: Session::default(),
            stream: Cursor::new(Vec::new()),
            remaining: 0,
            abort: AbortHandle::new(),
        }
    }

    /// Sends `request` and decodes the response.
    ///
    /// # Errors
    ///
    /// Returns the master's error response as a [`ReplicationError`].
    pub fn call(&mut self, request: Request) -> ReplicationResult<Response> {
        self.abort.check()?;
        let mut out = Vec::new();
        self.handler
            .handle(&mut self.session, request, &mut out)
            .map_err(|e| ReplicationError::unexpected(e.to_string()))?;
        self.stream = Cursor::new(out);
        match Response::read_from(&mut self.stream)? {
            Response::Error { code, message } => Err(ReplicationError::from_remote(code, message)),
            response => Ok(response),
        }
    }
}

impl MasterClient for LoopbackClient {
    fn check_last_log(
        &mut self,
        master_log_id: Uuid,
        slave_next: LogPageId,
        last: Option<LastPage>,
    ) -> ReplicationResult<()> {
        match self.call(Request::CheckLastLog {
            master_log_id,
            slave_next: slave_next.0,
            last_trx_id: last.map(|p| p.trx_id.0),
            last_page_crc: last.map(|p| p.crc),
        })? {
            Response::LastLogConfirmed => Ok(()),
            other => Err(ReplicationError::unexpected(format!("{other:?}"))),
        }
    }

    fn sync_log(&mut self, slave_next: LogPageId) -> ReplicationResult<LogPageId> {
        match self.call(Request::SyncLog {
            slave_next: slave_next.0,
        })? {
            Response::MasterNext { next } => Ok(LogPageId(next)),
            other => Err(ReplicationError::unexpected(format!("{other:?}"))),
        }
    }

    fn read_log(&mut self, start: LogPageId, max_pages: u32) -> ReplicationResult<PageRun> {
        match self.call(Request::ReadLog {
            start: start.0,
            max_pages,
        })? {
            Response::LogPages {
                count, page_size, ..
            } => {
                self.remaining = count;
                Ok(PageRun {
                    start,
                    count,
                    page_size: page_size as usize,
                })
            }
            other => Err(ReplicationError::unexpected(format!("{other:?}"))),
        }
    }

    fn read_page(&mut self, buf: &mut [u8]) -> ReplicationResult<()> {
        self.abort.check()?;
        if self.remaining == 0 {
            return Err(ReplicationError::unexpected("no page run in progress"));
        }
        self.stream.read_exact(buf)?;
        self.remaining -= 1;
        Ok(())
    }

    fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

/// A [`Connector`] producing [`LoopbackClient`]s for one master log.
#[derive(Clone)]
pub struct LoopbackConnector {
    handler: RequestHandler<PagedLog>,
}

impl LoopbackConnector {
    /// Serves `master` with the default server configuration.
    pub fn new(master: Arc<PagedLog>) -> Self {
        Self::with_config(master, ServerConfig::default())
    }

    /// Serves `master` with `config`.
    pub fn with_config(master: Arc<PagedLog>, config: ServerConfig) -> Self {
        Self {
            handler: RequestHandler::new(Arc::new(HandlerContext::new(config, master))),
        }
    }

    /// Opens a client without going through an agent.
    pub fn client(&self) -> LoopbackClient {
        LoopbackClient::new(self.handler.clone())
    }
}

impl Connector for LoopbackConnector {
    type Client = LoopbackClient;

    fn connect(&self, _info: &LogInfo) -> ReplicationResult<LoopbackClient> {
        Ok(self.client())
    }
}

impl ReplicaPair {
    /// Returns a loopback connector to the master.
    pub fn connector(&self) -> LoopbackConnector {
        LoopbackConnector::new(Arc::clone(&self.master.log))
    }

    /// Creates an agent replicating this pair over loopback. Faults are sent
    /// to the returned channel.
    pub fn loopback_agent(
        &self,
        config: SlaveConfig,
    ) -> (
        ReplicationAgent<PagedLog, LoopbackConnector>,
        crossbeam_channel::Receiver<tessera_repl_agent::Fault>,
    ) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let agent = ReplicationAgent::new(
            config,
            Arc::clone(&self.slave.log),
            self.connector(),
            Arc::new(tx),
        )
        .expect("Invalid slave configuration");
        (agent, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::LogStorage;

    #[test]
    fn loopback_round_trip() {
        let pair = ReplicaPair::new(5, 0);
        let mut client = pair.connector().client();
        assert_eq!(client.sync_log(LogPageId(0)).unwrap(), LogPageId(5));

        let run = client.read_log(LogPageId(1), 2).unwrap();
        assert_eq!(run.count, 2);
        let mut page = vec![0u8; run.page_size];
        client.read_page(&mut page).unwrap();
        client.read_page(&mut page).unwrap();
        assert!(client.read_page(&mut page).is_err());

        let mut expected = vec![0u8; run.page_size];
        pair.master
            .admin_log_read(LogPageId(2), &mut expected, 1)
            .unwrap();
        assert_eq!(page, expected);
    }

    #[test]
    fn aborted_client_fails() {
        let pair = ReplicaPair::new(1, 0);
        let mut client = pair.connector().client();
        client.abort_handle().abort();
        assert!(matches!(
            client.sync_log(LogPageId(0)),
            Err(ReplicationError::Closed)
        ));
    }
}
