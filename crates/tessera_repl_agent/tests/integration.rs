//! Integration tests for the replication agent and the master endpoint.

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{LogInfo, LogPageId, LogStorage, PageId, PagedLog, StorageConfig};
use tessera_repl_agent::{
    AbortHandle, Connector, LastPage, MasterClient, PageRun, ReplicationAgent, ReplicationError,
    ReplicationResult, SlaveConfig, StorageShutdown, TcpConnector,
};
use tessera_repl_protocol::{Request, Response};
use tessera_repl_server::{
    HandlerContext, MasterServer, RequestHandler, ServerConfig, Session,
};
use tessera_storage::{FileBackend, InMemoryBackend};

const PAGE: usize = 512;

fn config() -> StorageConfig {
    StorageConfig::new()
        .page_size(PAGE)
        .cache_size(64)
        .log_buffer_pages(8)
        .lock_timeout(Duration::from_secs(2))
}

/// A client that hands requests straight to a server-side handler.
struct InProcessClient {
    handler: RequestHandler<PagedLog>,
    session: Session,
    pages: Cursor<Vec<u8>>,
}

impl InProcessClient {
    fn call(&mut self, request: Request) -> ReplicationResult<Response> {
        let mut out = Vec::new();
        self.handler
            .handle(&mut self.session, request, &mut out)
            .map_err(|e| ReplicationError::unexpected(e.to_string()))?;
        let mut stream = Cursor::new(out);
        let response = Response::read_from(&mut stream)?;
        let consumed = stream.position() as usize;
        self.pages = Cursor::new(stream.into_inner().split_off(consumed));
        match response {
            Response::Error { code, message } => Err(ReplicationError::from_remote(code, message)),
            response => Ok(response),
        }
    }
}

impl MasterClient for InProcessClient {
    fn check_last_log(
        &mut self,
        master_log_id: uuid::Uuid,
        slave_next: LogPageId,
        last: Option<LastPage>,
    ) -> ReplicationResult<()> {
        self.call(Request::CheckLastLog {
            master_log_id,
            slave_next: slave_next.0,
            last_trx_id: last.map(|p| p.trx_id.0),
            last_page_crc: last.map(|p| p.crc),
        })
        .map(|_| ())
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
            } => Ok(PageRun {
                start,
                count,
                page_size: page_size as usize,
            }),
            other => Err(ReplicationError::unexpected(format!("{other:?}"))),
        }
    }

    fn read_page(&mut self, buf: &mut [u8]) -> ReplicationResult<()> {
        self.pages.read_exact(buf)?;
        Ok(())
    }

    fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new()
    }
}

struct InProcessConnector {
    handler: RequestHandler<PagedLog>,
}

impl Connector for InProcessConnector {
    type Client = InProcessClient;

    fn connect(&self, _info: &LogInfo) -> ReplicationResult<InProcessClient> {
        Ok(InProcessClient {
            handler: self.handler.clone(),
            session: Session::default(),
            pages: Cursor::new(Vec::new()),
        })
    }
}

fn write_master(log: &PagedLog, commits: u64) {
    for id in 0..commits {
        let mut trx = log.begin_modify().unwrap();
        trx.write_page(PageId(id), format!("entity {id}").as_bytes())
            .unwrap();
        if id % 3 == 2 {
            trx.free_page(PageId(id - 1));
        }
        trx.commit().unwrap();
    }
}

fn new_slave(master: &PagedLog) -> Arc<PagedLog> {
    let master_id = master.log_info().unwrap().log_id;
    Arc::new(PagedLog::create_slave(Box::new(InMemoryBackend::new()), config(), master_id).unwrap())
}

#[test]
fn in_process_replication_matches_master() {
    let master = Arc::new(PagedLog::create(Box::new(InMemoryBackend::new()), config()).unwrap());
    write_master(&master, 9);
    let slave = new_slave(&master);

    let handler = RequestHandler::new(Arc::new(HandlerContext::new(
        ServerConfig::default(),
        Arc::clone(&master),
    )));
    let mut client = InProcessConnector {
        handler: handler.clone(),
    }
    .connect(&slave.log_info().unwrap())
    .unwrap();
    let (tx, _rx) = crossbeam_channel::unbounded();
    let agent = ReplicationAgent::new(
        SlaveConfig::new("in-process", 1).with_max_pages_per_transaction(4),
        Arc::clone(&slave),
        InProcessConnector { handler },
        Arc::new(tx),
    )
    .unwrap();

    let applied = agent.run_once(&mut client).unwrap();

    let master_next = master.log_info().unwrap().next;
    assert_eq!(applied, master_next.0);
    assert_eq!(slave.log_info().unwrap().next, master_next);

    let master_read = master.begin_read().unwrap();
    let slave_read = slave.begin_read().unwrap();
    for id in 0..9 {
        assert_eq!(
            slave_read.read(PageId(id)).unwrap(),
            master_read.read(PageId(id)).unwrap(),
            "page {id}"
        );
    }
    // Page 1 was freed by the third commit.
    assert_eq!(slave_read.read(PageId(1)).unwrap(), None);
}

#[test]
fn authenticated_tcp_replication() {
    let secret = b"shared-replication-secret".to_vec();
    let master = Arc::new(PagedLog::create(Box::new(InMemoryBackend::new()), config()).unwrap());
    write_master(&master, 5);
    let slave = new_slave(&master);

    let server = MasterServer::new(
        ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_auth(secret.clone()),
        Arc::clone(&master),
    )
    .unwrap()
    .start()
    .unwrap();
    let addr = server.local_addr();

    let wrong = SlaveConfig::new(addr.ip().to_string(), addr.port()).with_auth(b"wrong".to_vec());
    let err = TcpConnector::from_config(&wrong)
        .connect(&slave.log_info().unwrap())
        .err()
        .unwrap();
    assert!(matches!(err, ReplicationError::NotAuthorized(_)));

    let slave_config = SlaveConfig::new(addr.ip().to_string(), addr.port()).with_auth(secret);
    let connector = TcpConnector::from_config(&slave_config);
    let (tx, _rx) = crossbeam_channel::unbounded();
    let agent = ReplicationAgent::new(slave_config, Arc::clone(&slave), connector.clone(), Arc::new(tx)).unwrap();

    let mut client = connector.connect(&slave.log_info().unwrap()).unwrap();
    assert_eq!(agent.run_once(&mut client).unwrap(), 5);
    assert_eq!(slave.log_info().unwrap().next, master.log_info().unwrap().next);

    server.shutdown().unwrap();
}

#[test]
fn file_backed_slave_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slave.log");

    let master = Arc::new(PagedLog::create(Box::new(InMemoryBackend::new()), config()).unwrap());
    write_master(&master, 6);
    let master_id = master.log_info().unwrap().log_id;
    let server = MasterServer::new(
        ServerConfig::new("127.0.0.1:0".parse().unwrap()),
        Arc::clone(&master),
    )
    .unwrap()
    .start()
    .unwrap();
    let addr = server.local_addr();
    let slave_config = SlaveConfig::new(addr.ip().to_string(), addr.port());

    {
        let backend = FileBackend::open(&path).unwrap();
        let slave = Arc::new(PagedLog::create_slave(Box::new(backend), config(), master_id).unwrap());
        let connector = TcpConnector::from_config(&slave_config);
        let sink = StorageShutdown::new(Arc::clone(&slave));
        let agent = ReplicationAgent::new(slave_config.clone(), Arc::clone(&slave), connector.clone(), Arc::new(sink)).unwrap();
        let mut client = connector.connect(&slave.log_info().unwrap()).unwrap();
        agent.run_once(&mut client).unwrap();
        drop(client);
        drop(agent);
        slave.close().unwrap();
    }

    write_master(&master, 2);

    let backend = FileBackend::open(&path).unwrap();
    let slave = Arc::new(PagedLog::open(Box::new(backend), config()).unwrap());
    assert!(slave.log_info().unwrap().is_slave());
    assert_eq!(slave.log_info().unwrap().master_log_id, Some(master_id));

    let connector = TcpConnector::from_config(&slave_config);
    let (tx, _rx) = crossbeam_channel::unbounded();
    let agent = ReplicationAgent::new(slave_config, Arc::clone(&slave), connector.clone(), Arc::new(tx)).unwrap();
    let mut client = connector.connect(&slave.log_info().unwrap()).unwrap();
    assert_eq!(agent.run_once(&mut client).unwrap(), 2);
    assert_eq!(slave.log_info().unwrap().next, master.log_info().unwrap().next);
}
