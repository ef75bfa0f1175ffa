//! Local read and modify transactions.
//!
//! A [`ReadTransaction`] holds the shared read lock for its whole life, so it
//! sees one committed state and never a commit in progress. A
//! [`ModifyTransaction`] stages page writes privately and appends them to the
//! log only at commit time.

use crate::error::{CoreError, CoreResult};
use crate::lock::ReadLock;
use crate::log::{LogInfo, LogStorage, ModifyScope, PagedLog};
use crate::types::{PageId, TrxId};
use std::collections::BTreeMap;
use tessera_storage::{page_body, seal_freed_page, seal_page, verify_page, PAGE_HEADER_SIZE};

impl PagedLog {
    /// Begins a read transaction.
    ///
    /// # Errors
    ///
    /// Returns `RolledBack` if a commit holds the lock past the timeout, or
    /// `LogClosed`.
    pub fn begin_read(&self) -> CoreResult<ReadTransaction<'_>> {
        let lock = self.locks().lock_read()?;
        let info = self.log_info()?;
        Ok(ReadTransaction {
            log: self,
            lock,
            info,
        })
    }

    /// Begins a modify transaction.
    ///
    /// # Errors
    ///
    /// Returns `SlaveReadOnly` while the log is a replication slave,
    /// `RolledBack` on lock timeout, or `LogClosed`.
    pub fn begin_modify(&self) -> CoreResult<ModifyTransaction<'_>> {
        let scope = ModifyScope::begin(self)?;
        if scope.start_info().is_slave() {
            scope.rollback();
            return Err(CoreError::SlaveReadOnly);
        }
        Ok(ModifyTransaction {
            log: self,
            scope,
            staged: BTreeMap::new(),
        })
    }
}

fn decode_body(page: &[u8]) -> CoreResult<Option<Vec<u8>>> {
    let header = verify_page(page)?;
    if header.is_freed() {
        return Ok(None);
    }
    Ok(Some(page_body(page, &header)?.to_vec()))
}

/// A read-only view of the committed log.
#[derive(Debug)]
pub struct ReadTransaction<'a> {
    log: &'a PagedLog,
    lock: ReadLock<'a>,
    info: LogInfo,
}

impl ReadTransaction<'_> {
    /// Returns the log state this transaction reads.
    #[must_use]
    pub fn info(&self) -> &LogInfo {
        &self.info
    }

    /// Copies the committed image of `page_id` into `buf`.
    ///
    /// Returns false if the page was never written or has been freed.
    ///
    /// # Errors
    ///
    /// Returns an error if `buf` is smaller than a page or the read fails.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> CoreResult<bool> {
        self.log.read_committed(page_id, buf)
    }

    /// Returns the body of `page_id`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the page fails verification.
    pub fn read(&self, page_id: PageId) -> CoreResult<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.log.page_size()];
        if !self.read_page(page_id, &mut buf)? {
            return Ok(None);
        }
        decode_body(&buf)
    }

    /// Ends the transaction and releases the read lock.
    pub fn finish(self) {
        self.lock.unlock();
    }
}

/// A transaction that stages page writes and publishes them on commit.
#[derive(Debug)]
pub struct ModifyTransaction<'a> {
    log: &'a PagedLog,
    scope: ModifyScope<'a, PagedLog>,
    staged: BTreeMap<PageId, Option<Vec<u8>>>,
}

impl ModifyTransaction<'_> {
    /// Returns the transaction id stamped into every written page.
    #[must_use]
    pub fn trx_id(&self) -> TrxId {
        self.scope.ticket().trx_id()
    }

    /// Returns the log state observed when the transaction began.
    #[must_use]
    pub fn info(&self) -> LogInfo {
        self.scope.start_info()
    }

    /// Stages a new body for `page_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not fit in a page.
    pub fn write_page(&mut self, page_id: PageId, body: &[u8]) -> CoreResult<()> {
        let capacity = self.log.page_size() - PAGE_HEADER_SIZE;
        if body.len() > capacity {
            return Err(CoreError::invalid_operation(format!(
                "body of {} bytes exceeds page capacity {capacity}",
                body.len()
            )));
        }
        self.staged.insert(page_id, Some(body.to_vec()));
        Ok(())
    }

    /// Stages freeing `page_id`.
    pub fn free_page(&mut self, page_id: PageId) {
        self.staged.insert(page_id, None);
    }

    /// Returns the body of `page_id` as this transaction sees it.
    ///
    /// # Errors
    ///
    /// Returns an error if the committed page fails verification.
    pub fn read(&self, page_id: PageId) -> CoreResult<Option<Vec<u8>>> {
        if let Some(staged) = self.staged.get(&page_id) {
            return Ok(staged.clone());
        }
        let mut buf = vec![0u8; self.log.page_size()];
        if !self.log.read_committed(page_id, &mut buf)? {
            return Ok(None);
        }
        decode_body(&buf)
    }

    /// Returns the number of staged pages.
    #[must_use]
    pub fn staged_pages(&self) -> usize {
        self.staged.len()
    }

    /// Appends the staged pages and commits them.
    ///
    /// A transaction with nothing staged is rolled back and returns the
    /// unchanged log state.
    ///
    /// # Errors
    ///
    /// Returns the commit error; the transaction is rolled back in that case.
    pub fn commit(self) -> CoreResult<LogInfo> {
        let ModifyTransaction {
            log,
            mut scope,
            staged,
        } = self;

        if staged.is_empty() {
            let info = scope.start_info();
            scope.rollback();
            return Ok(info);
        }

        let trx = scope.ticket().trx_id();
        let mut pos = scope.start_info().next;
        let total = staged.len() as u64;

        let mut buffer = log.log_buffer();
        let capacity = buffer.capacity();
        let mut filled = 0;
        for (page_id, body) in &staged {
            let slot = buffer.page_mut(filled);
            match body {
                Some(body) => seal_page(slot, page_id.0, trx.0, body)?,
                None => seal_freed_page(slot, page_id.0, trx.0)?,
            }
            filled += 1;
            if filled == capacity {
                scope.append(pos, buffer.pages(filled), filled)?;
                pos = pos.advance(filled as u64);
                filled = 0;
            }
        }
        if filled > 0 {
            scope.append(pos, buffer.pages(filled), filled)?;
        }
        drop(buffer);

        scope.commit(total)
    }

    /// Discards the staged pages.
    pub fn rollback(self) {
        self.scope.rollback();
    }
}
