//! Log fixtures.
//!
//! Provides ready-made logs and master/slave pairs with deterministic
//! contents.

use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;
use tessera_core::{LogPageId, LogStorage, ModifyScope, PageId, PagedLog, StorageConfig};
use tessera_storage::{FileBackend, InMemoryBackend};
use uuid::Uuid;

/// Page size used by fixtures.
pub const TEST_PAGE_SIZE: usize = 512;

/// Storage configuration used by fixtures: small pages, a small cache and a
/// short lock timeout.
pub fn test_config() -> StorageConfig {
    StorageConfig::new()
        .page_size(TEST_PAGE_SIZE)
        .cache_size(64)
        .cache_banks(4)
        .log_buffer_pages(4)
        .lock_timeout(Duration::from_secs(2))
        .sync_on_write(false)
}

/// Installs a `tracing` subscriber honouring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Deterministic body for the `seq`-th write of `page_id`.
pub fn page_contents(page_id: u64, seq: u64) -> Vec<u8> {
    let len = 16 + ((page_id * 31 + seq * 7) % 200) as usize;
    (0..len)
        .map(|i| (page_id as usize * 13 + seq as usize * 5 + i) as u8)
        .collect()
}

/// A log with automatic cleanup of its backing file.
pub struct TestLog {
    /// The log.
    pub log: Arc<PagedLog>,
    _temp_dir: Option<TempDir>,
}

impl TestLog {
    /// Creates an in-memory master log.
    pub fn memory() -> Self {
        Self::memory_with(test_config())
    }

    /// Creates an in-memory master log with `config`.
    pub fn memory_with(config: StorageConfig) -> Self {
        let log = PagedLog::create(Box::new(InMemoryBackend::new()), config)
            .expect("Failed to create in-memory log");
        Self {
            log: Arc::new(log),
            _temp_dir: None,
        }
    }

    /// Creates an in-memory slave of `master_log_id`.
    pub fn memory_slave(master_log_id: Uuid) -> Self {
        let log = PagedLog::create_slave(Box::new(InMemoryBackend::new()), test_config(), master_log_id)
            .expect("Failed to create in-memory slave");
        Self {
            log: Arc::new(log),
            _temp_dir: None,
        }
    }

    /// Creates a file-backed master log in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let backend = FileBackend::open_with_create_dirs(&temp_dir.path().join("tessera.log"))
            .expect("Failed to create log file");
        let log = PagedLog::create(Box::new(backend), test_config()).expect("Failed to create file log");
        Self {
            log: Arc::new(log),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Closes a file-backed log and opens it again from disk.
    ///
    /// # Panics
    ///
    /// Panics if the log is in memory or still shared.
    pub fn reopen(self) -> Self {
        let path = self.path().expect("Only file logs can be reopened");
        let TestLog { log, _temp_dir } = self;
        log.close().expect("Failed to close log");
        drop(Arc::into_inner(log).expect("Log is still shared"));

        let backend = FileBackend::open(&path).expect("Failed to reopen log file");
        let log = PagedLog::open(Box::new(backend), test_config()).expect("Failed to open log");
        Self {
            log: Arc::new(log),
            _temp_dir,
        }
    }

    /// Returns the log file path if file-backed.
    pub fn path(&self) -> Option<std::path::PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join("tessera.log"))
    }
}

impl std::ops::Deref for TestLog {
    type Target = PagedLog;

    fn deref(&self) -> &Self::Target {
        &self.log
    }
}

/// Commits `commits` single-page transactions. Commit `i` writes page
/// `i % distinct_pages` with [`page_contents`].
pub fn populate(log: &PagedLog, commits: u64, distinct_pages: u64) {
    for seq in 0..commits {
        let page_id = seq % distinct_pages.max(1);
        let mut trx = log.begin_modify().expect("Failed to begin modify");
        trx.write_page(PageId(page_id), &page_contents(page_id, seq))
            .expect("Failed to write page");
        trx.commit().expect("Failed to commit");
    }
}

/// Copies the master's log pages `[slave.next, until)` into the slave as one
/// transaction, bypassing the network.
pub fn copy_log(master: &PagedLog, slave: &PagedLog, until: LogPageId) {
    let start = slave.log_info().expect("Slave closed").next;
    let count = until.distance_from(start) as usize;
    if count == 0 {
        return;
    }
    let mut pages = vec![0u8; count * master.page_size()];
    master
        .admin_log_read(start, &mut pages, count)
        .expect("Failed to read master log");
    let mut scope = ModifyScope::begin(slave).expect("Failed to begin slave transaction");
    scope.append(start, &pages, count).expect("Failed to append");
    scope.commit(count as u64).expect("Failed to commit");
}

/// Returns the raw bytes of log pages `[start, end)`.
pub fn log_bytes(log: &PagedLog, start: LogPageId, end: LogPageId) -> Vec<u8> {
    let count = end.distance_from(start) as usize;
    let mut buf = vec![0u8; count * log.page_size()];
    log.admin_log_read(start, &mut buf, count)
        .expect("Failed to read log");
    buf
}

/// A master log with `master_pages` committed pages and a slave holding its
/// first `slave_pages`.
pub struct ReplicaPair {
    /// The master.
    pub master: TestLog,
    /// The slave.
    pub slave: TestLog,
}

impl ReplicaPair {
    /// Creates the pair. Each master commit writes one page.
    pub fn new(master_pages: u64, slave_pages: u64) -> Self {
        assert!(slave_pages <= master_pages, "slave cannot be ahead");
        let master = TestLog::memory();
        populate(&master, master_pages, 8);
        let slave = TestLog::memory_slave(master.log_info().expect("Master closed").log_id);
        copy_log(&master, &slave, LogPageId(slave_pages));
        Self { master, slave }
    }

    /// Returns `(master.next, slave.next)`.
    pub fn positions(&self) -> (LogPageId, LogPageId) {
        (
            self.master.log_info().expect("Master closed").next,
            self.slave.log_info().expect("Slave closed").next,
        )
    }

    /// Asserts that the slave's log is a byte-identical prefix of the
    /// master's.
    pub fn assert_prefix(&self) {
        let (_, slave_next) = self.positions();
        assert_eq!(
            log_bytes(&self.slave, LogPageId(0), slave_next),
            log_bytes(&self.master, LogPageId(0), slave_next),
            "slave log differs from master"
        );
    }
}
