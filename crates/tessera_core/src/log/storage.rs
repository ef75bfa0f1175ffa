//! The log coordinator contract used by transactions and replication.

use super::buffer::LogBuffer;
use super::info::LogInfo;
use crate::error::CoreResult;
use crate::lock::ModifyLock;
use crate::types::{LogPageId, TrxId};
use parking_lot::MutexGuard;

/// Proof of an in-progress modify transaction.
///
/// A ticket owns the modify lock. It is consumed by exactly one of
/// [`LogStorage::commit_modify`] or [`LogStorage::rollback_modify`], which is
/// what releases the lock.
#[derive(Debug)]
pub struct ModifyTicket<'a> {
    lock: ModifyLock<'a>,
    start: LogInfo,
    trx_id: TrxId,
    appended: u64,
}

impl<'a> ModifyTicket<'a> {
    /// Creates a ticket for a transaction that began at `start`.
    pub fn new(lock: ModifyLock<'a>, start: LogInfo, trx_id: TrxId) -> Self {
        Self {
            lock,
            start,
            trx_id,
            appended: 0,
        }
    }

    /// Returns the log state observed when the transaction began.
    #[must_use]
    pub fn start_info(&self) -> &LogInfo {
        &self.start
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn trx_id(&self) -> TrxId {
        self.trx_id
    }

    /// Returns the number of pages appended so far.
    #[must_use]
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Returns the log page id the next append must start at.
    #[must_use]
    pub fn append_position(&self) -> LogPageId {
        self.start.next.advance(self.appended)
    }

    /// Records that `count` more pages were appended.
    pub fn record_append(&mut self, count: u64) {
        self.appended += count;
    }

    /// Releases the modify lock.
    pub fn release(self) {
        self.lock.unlock();
    }
}

/// Log and transaction coordinator.
///
/// Implementations own the append-only log, assign log page ids and publish
/// committed pages to readers.
pub trait LogStorage: Send + Sync {
    /// Returns the size of every log page in bytes.
    fn page_size(&self) -> usize;

    /// Returns the current committed snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the log is closed.
    fn log_info(&self) -> CoreResult<LogInfo>;

    /// Begins a modify transaction, waiting at most the lock timeout.
    ///
    /// The returned ticket carries the [`LogInfo`] valid at start. Callers
    /// must re-check [`LogInfo::is_slave`] on it, since the log may have been
    /// promoted or demoted since they last looked.
    ///
    /// # Errors
    ///
    /// Returns `RolledBack` on lock timeout, or `LogClosed`.
    fn start_modify(&self) -> CoreResult<ModifyTicket<'_>>;

    /// Durably appends `count` pages from `pages` starting at `start`.
    ///
    /// `start` must equal [`ModifyTicket::append_position`].
    ///
    /// # Errors
    ///
    /// Returns an error on a gap, a short buffer or an I/O failure.
    fn log_append(
        &self,
        ticket: &mut ModifyTicket<'_>,
        start: LogPageId,
        pages: &[u8],
        count: usize,
    ) -> CoreResult<()>;

    /// Commits the `count` pages appended under `ticket` and returns the new
    /// snapshot. On error the transaction has already been rolled back.
    ///
    /// # Errors
    ///
    /// Returns `RolledBack`, `TransactionCorrupted` or an I/O error.
    fn commit_modify(&self, ticket: ModifyTicket<'_>, count: u64) -> CoreResult<LogInfo>;

    /// Discards everything appended under `ticket` and releases its locks.
    fn rollback_modify(&self, ticket: ModifyTicket<'_>);

    /// Returns the shared staging buffer.
    fn log_buffer(&self) -> MutexGuard<'_, LogBuffer>;

    /// Reads `count` committed log pages starting at `start` into `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is not fully committed.
    fn admin_log_read(&self, start: LogPageId, buf: &mut [u8], count: usize) -> CoreResult<()>;

    /// Closes the log. Later operations fail with `LogClosed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the final header cannot be written.
    fn close(&self) -> CoreResult<()>;

    /// Returns true once [`LogStorage::close`] has been called.
    fn is_closed(&self) -> bool;
}

/// Scoped modify transaction.
///
/// Rolls the transaction back on drop unless [`ModifyScope::commit`]
/// succeeded, so every exit path releases the modify lock.
pub struct ModifyScope<'a, S: LogStorage + ?Sized> {
    storage: &'a S,
    ticket: Option<ModifyTicket<'a>>,
}

impl<'a, S: LogStorage + ?Sized> ModifyScope<'a, S> {
    /// Starts a modify transaction on `storage`.
    ///
    /// # Errors
    ///
    /// Propagates [`LogStorage::start_modify`] failures.
    pub fn begin(storage: &'a S) -> CoreResult<Self> {
        let ticket = storage.start_modify()?;
        Ok(Self {
            storage,
            ticket: Some(ticket),
        })
    }

    /// Returns the storage this scope belongs to.
    #[must_use]
    pub fn storage(&self) -> &'a S {
        self.storage
    }

    /// Returns the ticket.
    #[must_use]
    pub fn ticket(&self) -> &ModifyTicket<'a> {
        match &self.ticket {
            Some(ticket) => ticket,
            None => unreachable!("modify scope used after completion"),
        }
    }

    /// Returns the log state observed when the transaction began.
    #[must_use]
    pub fn start_info(&self) -> LogInfo {
        *self.ticket().start_info()
    }

    /// Appends `count` pages at `start`.
    ///
    /// # Errors
    ///
    /// Propagates [`LogStorage::log_append`] failures.
    pub fn append(&mut self, start: LogPageId, pages: &[u8], count: usize) -> CoreResult<()> {
        match self.ticket.as_mut() {
            Some(ticket) => self.storage.log_append(ticket, start, pages, count),
            None => unreachable!("modify scope used after completion"),
        }
    }

    /// Commits `count` appended pages.
    ///
    /// # Errors
    ///
    /// Propagates [`LogStorage::commit_modify`] failures. The transaction is
    /// rolled back in that case.
    pub fn commit(mut self, count: u64) -> CoreResult<LogInfo> {
        match self.ticket.take() {
            Some(ticket) => self.storage.commit_modify(ticket, count),
            None => unreachable!("modify scope used after completion"),
        }
    }

    /// Rolls the transaction back now.
    pub fn rollback(mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.storage.rollback_modify(ticket);
        }
    }
}

impl<S: LogStorage + ?Sized> Drop for ModifyScope<'_, S> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.storage.rollback_modify(ticket);
        }
    }
}

impl<S: LogStorage + ?Sized> std::fmt::Debug for ModifyScope<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModifyScope")
            .field("ticket", &self.ticket)
            .finish()
    }
}
