//! The replication agent state machine.

use crate::config::{SlaveConfig, SlaveMode};
use crate::cron::CronSchedule;
use crate::destination::TrxDestination;
use crate::error::{ReplicationError, ReplicationResult};
use crate::reader::TrxReader;
use crate::sink::CriticalErrorSink;
use crate::state::{AgentState, AgentStats, Fault};
use crate::transport::{AbortHandle, Connector, LastPage, MasterClient};
use chrono::{Local, NaiveDateTime};
use parking_lot::{Condvar, Mutex, RwLock};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tessera_core::{LogInfo, LogStorage, ModifyScope, TrxId};
use tessera_storage::PageHeader;

/// Replicates a master's log into a local slave log.
///
/// Every chunk of pages is applied as one local modify transaction, through
/// the same path local writers use. A chunk that fails part way is rolled
/// back, so the slave's `next` only ever advances by whole chunks.
pub struct ReplicationAgent<S: LogStorage, C: Connector> {
    config: SlaveConfig,
    schedule: Option<CronSchedule>,
    storage: Arc<S>,
    connector: C,
    sink: Arc<dyn CriticalErrorSink>,
    state: RwLock<AgentState>,
    stats: RwLock<AgentStats>,
    connects: AtomicU64,
    closed: AtomicBool,
    wake_lock: Mutex<()>,
    wake: Condvar,
    active: Mutex<Option<AbortHandle>>,
}

impl<S: LogStorage, C: Connector> ReplicationAgent<S, C> {
    /// Creates an agent replicating into `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::InvalidConfig`] if the configuration is
    /// invalid.
    pub fn new(
        config: SlaveConfig,
        storage: Arc<S>,
        connector: C,
        sink: Arc<dyn CriticalErrorSink>,
    ) -> ReplicationResult<Self> {
        config.validate()?;
        let schedule = match &config.mode {
            SlaveMode::Cron { schedule, .. } => Some(CronSchedule::parse(schedule)?),
            SlaveMode::Realtime { .. } => None,
        };
        Ok(Self {
            config,
            schedule,
            storage,
            connector,
            sink,
            state: RwLock::new(AgentState::Idle),
            stats: RwLock::new(AgentStats::default()),
            connects: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
            active: Mutex::new(None),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SlaveConfig {
        &self.config
    }

    /// Returns the current state.
    pub fn state(&self) -> AgentState {
        self.state.read().clone()
    }

    /// Returns the statistics.
    pub fn stats(&self) -> AgentStats {
        self.stats.read().clone()
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn set_state(&self, state: AgentState) {
        let mut current = self.state.write();
        if current.is_terminal() {
            return;
        }
        if *current != state {
            tracing::debug!(from = ?*current, to = ?state, "agent state");
        }
        *current = state;
    }

    fn ensure_open(&self) -> ReplicationResult<()> {
        if self.is_closed() {
            Err(ReplicationError::Closed)
        } else {
            Ok(())
        }
    }

    /// Confirms that the local log still matches the master's.
    ///
    /// Returns the local log state that was checked.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::SlaveStopped`] if the storage is no longer
    /// a slave, or [`ReplicationError::WrongPageId`] if the logs diverged.
    pub fn check_slave<M: MasterClient + ?Sized>(&self, client: &mut M) -> ReplicationResult<LogInfo> {
        let info = self.storage.log_info()?;
        if !info.is_slave() {
            return Err(ReplicationError::SlaveStopped);
        }

        let last = match info.last_page() {
            Some(position) => {
                let mut page = vec![0u8; self.storage.page_size()];
                self.storage.admin_log_read(position, &mut page, 1)?;
                let header = PageHeader::decode(&page).map_err(tessera_core::CoreError::from)?;
                Some(LastPage {
                    trx_id: TrxId(header.trx_id),
                    crc: header.crc,
                })
            }
            None => None,
        };

        client.check_last_log(info.replication_log_id(), info.next, last)?;
        tracing::debug!(next = %info.next, "slave log confirmed by master");
        Ok(info)
    }

    /// Pulls and applies pages until the slave reaches the master's `next`.
    /// Returns the number of pages applied.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk fails. Chunks applied before it stay
    /// committed.
    pub fn session<M: MasterClient + ?Sized>(&self, client: &mut M) -> ReplicationResult<u64> {
        let slave_next = self.storage.log_info()?.next;
        let master_next = client.sync_log(slave_next)?;
        if master_next == slave_next {
            return Ok(0);
        }
        if master_next < slave_next {
            return Err(ReplicationError::WrongPageId(format!(
                "slave at {slave_next} is ahead of master at {master_next}"
            )));
        }

        tracing::info!(%slave_next, %master_next, "syncing from master");
        let mut applied = 0;
        loop {
            self.ensure_open()?;
            let next = self.storage.log_info()?.next;
            if next >= master_next {
                break;
            }
            let chunk = self.read_and_apply(client, master_next.distance_from(next))?;
            if chunk == 0 {
                return Err(ReplicationError::unexpected(format!(
                    "master reported {master_next} but sent no pages at {next}"
                )));
            }
            applied += chunk;
        }
        Ok(applied)
    }

    /// Applies one chunk of at most `remaining` pages as one local
    /// transaction. Returns the number of pages committed.
    ///
    /// Nothing is committed on error, and an empty chunk is rolled back.
    ///
    /// # Errors
    ///
    /// Returns an error from the transport, the destination or the commit.
    pub fn read_and_apply<M: MasterClient + ?Sized>(
        &self,
        client: &mut M,
        remaining: u64,
    ) -> ReplicationResult<u64> {
        let mut scope = ModifyScope::begin(&*self.storage)?;
        if !scope.start_info().is_slave() {
            scope.rollback();
            return Err(ReplicationError::SlaveStopped);
        }

        let max_pages = remaining.min(u64::from(self.config.max_pages_per_transaction)) as u32;
        let count = {
            let mut dest = TrxDestination::new(&mut scope);
            let count = TrxReader::new(client, self.storage.page_size()).transfer(max_pages, &mut dest)?;
            dest.flush()?;
            count
        };

        if count == 0 {
            scope.rollback();
            return Ok(0);
        }
        let info = scope.commit(count)?;
        tracing::debug!(pages = count, next = %info.next, "replicated transaction committed");

        let mut stats = self.stats.write();
        stats.pages_applied += count;
        stats.transactions_committed += 1;
        Ok(count)
    }

    /// Runs one check-and-sync cycle over `client`.
    ///
    /// # Errors
    ///
    /// Returns the first error of [`check_slave`](Self::check_slave) or
    /// [`session`](Self::session).
    pub fn run_once<M: MasterClient + ?Sized>(&self, client: &mut M) -> ReplicationResult<u64> {
        self.ensure_open()?;
        self.set_state(AgentState::Checking);
        self.check_slave(client)?;
        self.set_state(AgentState::Syncing);
        self.session(client)
    }

    fn connect(&self) -> ReplicationResult<C::Client> {
        self.ensure_open()?;
        self.set_state(AgentState::Connecting);
        let info = self.storage.log_info()?;
        if !info.is_slave() {
            return Err(ReplicationError::SlaveStopped);
        }
        let client = self.connector.connect(&info)?;
        if self.connects.fetch_add(1, Ordering::Relaxed) > 0 {
            self.stats.write().reconnects += 1;
        }

        let handle = client.abort_handle();
        *self.active.lock() = Some(handle.clone());
        // close() may have run before the handle was registered.
        if self.is_closed() {
            handle.abort();
            return Err(ReplicationError::Closed);
        }
        Ok(client)
    }

    fn disconnect(&self) {
        self.active.lock().take();
    }

    /// Records the outcome of a cycle and decides whether to keep running.
    fn finish_cycle(&self, result: ReplicationResult<u64>) -> ControlFlow<()> {
        match result {
            Ok(pages) => {
                let mut stats = self.stats.write();
                stats.cycles += 1;
                stats.last_sync = Some(Instant::now());
                stats.last_error = None;
                drop(stats);
                if pages > 0 {
                    tracing::info!(pages, "replication cycle applied pages");
                }
                self.set_state(AgentState::Idle);
                ControlFlow::Continue(())
            }
            Err(_) if self.is_closed() => {
                self.set_state(AgentState::Stopped);
                ControlFlow::Break(())
            }
            Err(e) if e.is_stop() => {
                tracing::info!(reason = %e, "replication stopped");
                self.set_state(AgentState::Stopped);
                ControlFlow::Break(())
            }
            Err(e) => match Fault::from_error(&e) {
                Some(fault) => {
                    tracing::error!(%fault, "replication faulted");
                    self.disconnect();
                    self.set_state(AgentState::Faulted(fault.clone()));
                    self.sink.shutdown(&fault);
                    ControlFlow::Break(())
                }
                None => {
                    tracing::warn!(error = %e, "replication cycle failed, will retry");
                    let mut stats = self.stats.write();
                    stats.transient_errors += 1;
                    stats.last_error = Some(e.to_string());
                    drop(stats);
                    self.set_state(AgentState::Idle);
                    ControlFlow::Continue(())
                }
            },
        }
    }

    /// Runs one realtime cycle, reusing `conn` while it is younger than
    /// `ttl`. Any error drops the connection.
    pub(crate) fn realtime_cycle(
        &self,
        conn: &mut Option<(C::Client, Instant)>,
        ttl: Duration,
    ) -> ControlFlow<()> {
        if conn.as_ref().is_some_and(|(_, opened)| opened.elapsed() >= ttl) {
            tracing::debug!("connection ttl expired, reconnecting");
            *conn = None;
            self.disconnect();
        }

        let (mut client, opened) = match conn.take() {
            Some(entry) => entry,
            None => match self.connect() {
                Ok(client) => (client, Instant::now()),
                Err(e) => {
                    self.disconnect();
                    return self.finish_cycle(Err(e));
                }
            },
        };
        let result = self.run_once(&mut client);
        if result.is_ok() {
            *conn = Some((client, opened));
        } else {
            self.disconnect();
        }
        self.finish_cycle(result)
    }

    /// Runs a cron cycle if `now` falls in a scheduled window that has not
    /// been served yet.
    pub(crate) fn cron_tick(
        &self,
        schedule: &CronSchedule,
        now: NaiveDateTime,
        tick: Duration,
        last_window: &mut Option<NaiveDateTime>,
    ) -> ControlFlow<()> {
        let Some(window) = schedule.due_window(now, tick) else {
            return ControlFlow::Continue(());
        };
        if *last_window == Some(window) {
            return ControlFlow::Continue(());
        }
        *last_window = Some(window);
        tracing::debug!(%window, %schedule, "cron window due");

        let result = self.connect().and_then(|mut client| self.run_once(&mut client));
        self.disconnect();
        self.finish_cycle(result)
    }

    /// Runs the agent on the calling thread until it stops or faults.
    pub fn run(&self) {
        tracing::info!(
            master = %self.config.master_addr(),
            slave_id = %self.config.slave_id,
            mode = ?self.config.mode,
            "replication agent started"
        );

        match (&self.config.mode, &self.schedule) {
            (
                SlaveMode::Realtime {
                    check_timeout,
                    connection_ttl,
                },
                _,
            ) => {
                let mut conn = None;
                while !self.is_closed() {
                    if self.realtime_cycle(&mut conn, *connection_ttl).is_break() {
                        break;
                    }
                    self.wait(*check_timeout);
                }
            }
            (SlaveMode::Cron { tick, .. }, Some(schedule)) => {
                let mut last_window = None;
                while !self.is_closed() {
                    let now = Local::now().naive_local();
                    if self
                        .cron_tick(schedule, now, *tick, &mut last_window)
                        .is_break()
                    {
                        break;
                    }
                    self.wait(*tick);
                }
            }
            (SlaveMode::Cron { .. }, None) => {}
        }

        self.disconnect();
        self.set_state(AgentState::Stopped);
        tracing::info!(state = ?self.state(), "replication agent exited");
    }

    fn wait(&self, timeout: Duration) {
        let mut guard = self.wake_lock.lock();
        if !self.is_closed() {
            self.wake.wait_for(&mut guard, timeout);
        }
    }

    /// Stops the agent. In-flight network reads are aborted and any
    /// partially applied transaction is rolled back.
    pub fn close(&self) {
        {
            let _guard = self.wake_lock.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            self.wake.notify_all();
        }
        if let Some(handle) = self.active.lock().take() {
            handle.abort();
        }
        if !self.state().is_active() {
            self.set_state(AgentState::Stopped);
        }
        tracing::info!("replication agent closed");
    }
}

impl<S: LogStorage + 'static, C: Connector + 'static> ReplicationAgent<S, C> {
    /// Runs the agent on a background thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(self) -> ReplicationResult<AgentHandle<S, C>> {
        let agent = Arc::new(self);
        let runner = Arc::clone(&agent);
        let thread = thread::Builder::new()
            .name("tessera-repl-agent".into())
            .spawn(move || runner.run())?;
        Ok(AgentHandle {
            agent,
            thread: Some(thread),
        })
    }
}

/// Handle to an agent running on its own thread.
///
/// Dropping the handle closes the agent and waits for the thread.
pub struct AgentHandle<S: LogStorage, C: Connector> {
    agent: Arc<ReplicationAgent<S, C>>,
    thread: Option<JoinHandle<()>>,
}

impl<S: LogStorage, C: Connector> AgentHandle<S, C> {
    /// Returns the agent.
    pub fn agent(&self) -> &ReplicationAgent<S, C> {
        &self.agent
    }

    /// Returns true once the agent thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Closes the agent and waits for its thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent thread panicked.
    pub fn close(mut self) -> ReplicationResult<AgentState> {
        self.shutdown()?;
        Ok(self.agent.state())
    }

    fn shutdown(&mut self) -> ReplicationResult<()> {
        self.agent.close();
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| ReplicationError::unexpected("agent thread panicked")),
            None => Ok(()),
        }
    }
}

impl<S: LogStorage, C: Connector> Drop for AgentHandle<S, C> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "replication agent shutdown failed");
        }
    }
}

impl<S: LogStorage, C: Connector> std::fmt::Debug for ReplicationAgent<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationAgent")
            .field("master", &self.config.master_addr())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
