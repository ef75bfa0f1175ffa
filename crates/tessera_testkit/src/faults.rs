//! Fault injection for replication transports.
//!
//! [`FailingConnector`] wraps any [`Connector`] and makes connects or page
//! reads fail according to a [`FaultPlan`]. Counters are shared between the
//! connector and every client it produces, so a plan spans reconnects.

use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_core::{LogInfo, LogPageId};
use tessera_repl_agent::{
    AbortHandle, Connector, LastPage, MasterClient, PageRun, ReplicationError, ReplicationResult,
};
use tessera_storage::PAGE_HEADER_SIZE;
use uuid::Uuid;

/// When injected failures fire.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Number of connect attempts to refuse before succeeding.
    pub failed_connects: u64,
    /// Fail the page read after this many pages were read successfully.
    /// Fires once.
    pub fail_after_pages: Option<u64>,
    /// Fail every `sync_log` call.
    pub fail_sync: bool,
    /// Flip a body byte of the page with this read index. Fires once.
    pub corrupt_page: Option<u64>,
}

impl FaultPlan {
    /// A plan that injects nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Refuses the first `count` connects.
    pub fn refuse_connects(mut self, count: u64) -> Self {
        self.failed_connects = count;
        self
    }

    /// Drops the connection after `pages` pages have been read.
    pub fn drop_after_pages(mut self, pages: u64) -> Self {
        self.fail_after_pages = Some(pages);
        self
    }

    /// Fails every `sync_log` call.
    pub fn fail_sync(mut self) -> Self {
        self.fail_sync = true;
        self
    }

    /// Corrupts the body of the `index`-th page read, counted from zero
    /// across all clients.
    pub fn corrupt_page(mut self, index: u64) -> Self {
        self.corrupt_page = Some(index);
        self
    }
}

#[derive(Debug, Default)]
struct FaultState {
    plan: Mutex<FaultPlan>,
    connects: AtomicU64,
    pages: AtomicU64,
    injected: AtomicU64,
}

impl FaultState {
    fn inject(&self, what: &str) -> ReplicationError {
        self.injected.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(what, "injecting transport fault");
        ReplicationError::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            format!("injected {what} failure"),
        ))
    }
}

/// A [`Connector`] that fails according to a [`FaultPlan`].
///
/// Clones share the plan and counters, so a test can keep one to inspect
/// while an agent owns another.
#[derive(Clone)]
pub struct FailingConnector<C> {
    inner: C,
    state: Arc<FaultState>,
}

impl<C> FailingConnector<C> {
    /// Wraps `inner`.
    pub fn new(inner: C, plan: FaultPlan) -> Self {
        Self {
            inner,
            state: Arc::new(FaultState {
                plan: Mutex::new(plan),
                ..FaultState::default()
            }),
        }
    }

    /// Replaces the plan. Counters are kept.
    pub fn set_plan(&self, plan: FaultPlan) {
        *self.state.plan.lock() = plan;
    }

    /// Returns the number of connect attempts seen.
    pub fn connects(&self) -> u64 {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Returns the number of pages read through clients of this connector.
    pub fn pages_read(&self) -> u64 {
        self.state.pages.load(Ordering::SeqCst)
    }

    /// Returns the number of failures injected so far.
    pub fn injected(&self) -> u64 {
        self.state.injected.load(Ordering::SeqCst)
    }
}

impl<C: Connector> Connector for FailingConnector<C> {
    type Client = FailingClient<C::Client>;

    fn connect(&self, info: &LogInfo) -> ReplicationResult<Self::Client> {
        let attempt = self.state.connects.fetch_add(1, Ordering::SeqCst);
        if attempt < self.state.plan.lock().failed_connects {
            return Err(self.state.inject("connect"));
        }
        Ok(FailingClient {
            inner: self.inner.connect(info)?,
            state: Arc::clone(&self.state),
        })
    }
}

/// Client produced by [`FailingConnector`].
pub struct FailingClient<M> {
    inner: M,
    state: Arc<FaultState>,
}

impl<M: MasterClient> MasterClient for FailingClient<M> {
    fn check_last_log(
        &mut self,
        master_log_id: Uuid,
        slave_next: LogPageId,
        last: Option<LastPage>,
    ) -> ReplicationResult<()> {
        self.inner.check_last_log(master_log_id, slave_next, last)
    }

    fn sync_log(&mut self, slave_next: LogPageId) -> ReplicationResult<LogPageId> {
        if self.state.plan.lock().fail_sync {
            return Err(self.state.inject("sync"));
        }
        self.inner.sync_log(slave_next)
    }

    fn read_log(&mut self, start: LogPageId, max_pages: u32) -> ReplicationResult<PageRun> {
        self.inner.read_log(start, max_pages)
    }

    fn read_page(&mut self, buf: &mut [u8]) -> ReplicationResult<()> {
        {
            let mut plan = self.state.plan.lock();
            if plan.fail_after_pages == Some(self.state.pages.load(Ordering::SeqCst)) {
                plan.fail_after_pages = None;
                drop(plan);
                return Err(self.state.inject("page read"));
            }
        }
        self.inner.read_page(buf)?;
        let index = self.state.pages.fetch_add(1, Ordering::SeqCst);
        let mut plan = self.state.plan.lock();
        if plan.corrupt_page == Some(index) && buf.len() > PAGE_HEADER_SIZE {
            plan.corrupt_page = None;
            buf[PAGE_HEADER_SIZE] ^= 0xFF;
            self.state.injected.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(index, "corrupting page body");
        }
        Ok(())
    }

    fn abort_handle(&self) -> AbortHandle {
        self.inner.abort_handle()
    }
}
