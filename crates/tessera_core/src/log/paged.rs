//! Page-structured log over a single storage backend.
//!
//! Layout: slot 0 holds the header page, a sealed page whose body is the
//! encoded [`LogInfo`] followed by the page size. Log page `k` lives at byte
//! offset `(k + 1) * page_size`.

use super::buffer::LogBuffer;
use super::info::{LogInfo, LOG_HEADER_SIZE};
use super::storage::{LogStorage, ModifyTicket};
use crate::cache::PageCache;
use crate::config::StorageConfig;
use crate::error::{CoreError, CoreResult};
use crate::lock::LockManager;
use crate::types::{LogPageId, PageId, TrxId};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tessera_storage::{page_body, seal_page, verify_page, StorageBackend};
use uuid::Uuid;

/// The write-ahead log of one storage instance.
///
/// `PagedLog` implements [`LogStorage`]: it assigns log page ids, appends
/// pages durably, verifies and publishes them on commit and answers
/// replication reads. It also owns the page cache and lock manager shared by
/// every transaction on the instance.
///
/// Dropping a log without calling [`LogStorage::close`] leaves its header
/// marked as not cleanly stopped; the next [`PagedLog::open`] reports it.
pub struct PagedLog {
    config: StorageConfig,
    backend: Mutex<Box<dyn StorageBackend>>,
    info: RwLock<LogInfo>,
    locks: LockManager,
    cache: PageCache,
    page_index: RwLock<HashMap<PageId, LogPageId>>,
    buffer: Mutex<LogBuffer>,
    next_trx_id: AtomicU64,
    closed: AtomicBool,
}

impl PagedLog {
    /// Creates a new, empty master log on an empty backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the backend is not
    /// empty or the header cannot be written.
    pub fn create(backend: Box<dyn StorageBackend>, config: StorageConfig) -> CoreResult<Self> {
        Self::create_with(backend, config, LogInfo::new_master())
    }

    /// Creates a new, empty slave log replicating `master_log_id`.
    ///
    /// # Errors
    ///
    /// Same as [`PagedLog::create`].
    pub fn create_slave(
        backend: Box<dyn StorageBackend>,
        config: StorageConfig,
        master_log_id: Uuid,
    ) -> CoreResult<Self> {
        Self::create_with(backend, config, LogInfo::new_slave(master_log_id))
    }

    fn create_with(
        mut backend: Box<dyn StorageBackend>,
        config: StorageConfig,
        mut info: LogInfo,
    ) -> CoreResult<Self> {
        config.validate()?;
        if backend.size()? != 0 {
            return Err(CoreError::invalid_operation(
                "cannot create a log on a non-empty backend",
            ));
        }

        info.successful_stop = false;
        write_header(backend.as_mut(), &info, config.page_size)?;
        tracing::info!(log_id = %info.log_id, slave = info.slave, "created log");

        Ok(Self::assemble(backend, config, info, HashMap::new(), 1))
    }

    /// Opens an existing log.
    ///
    /// Every committed page is verified and the page index is rebuilt. An
    /// unclean previous shutdown is logged.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for a bad header or page size mismatch, and
    /// `TransactionCorrupted` if any committed page fails verification.
    pub fn open(mut backend: Box<dyn StorageBackend>, config: StorageConfig) -> CoreResult<Self> {
        config.validate()?;
        let page_size = config.page_size;

        let mut info = read_header(backend.as_ref(), page_size)?;
        if !info.successful_stop {
            tracing::warn!(
                log_id = %info.log_id,
                next = info.next.0,
                "log was not stopped cleanly; verifying committed pages"
            );
        }

        let mut index = HashMap::new();
        let mut max_trx = 0u64;
        let mut pos = info.start;
        while pos < info.next {
            let page = backend
                .read_at(page_offset(pos, page_size), page_size)
                .map_err(|e| CoreError::transaction_corrupted(pos, e.to_string()))?;
            let header = verify_page(&page)
                .map_err(|e| CoreError::transaction_corrupted(pos, e.to_string()))?;
            max_trx = max_trx.max(header.trx_id);
            if header.is_freed() {
                index.remove(&PageId(header.page_id));
            } else {
                index.insert(PageId(header.page_id), pos);
            }
            pos = pos.advance(1);
        }

        info.successful_stop = false;
        write_header(backend.as_mut(), &info, page_size)?;
        tracing::info!(
            log_id = %info.log_id,
            next = info.next.0,
            pages = index.len(),
            slave = info.slave,
            "opened log"
        );

        Ok(Self::assemble(backend, config, info, index, max_trx + 1))
    }

    fn assemble(
        backend: Box<dyn StorageBackend>,
        config: StorageConfig,
        info: LogInfo,
        index: HashMap<PageId, LogPageId>,
        next_trx_id: u64,
    ) -> Self {
        Self {
            cache: PageCache::from_config(&config),
            locks: LockManager::new(config.lock_timeout),
            buffer: Mutex::new(LogBuffer::new(config.page_size, config.log_buffer_pages)),
            backend: Mutex::new(backend),
            info: RwLock::new(info),
            page_index: RwLock::new(index),
            next_trx_id: AtomicU64::new(next_trx_id),
            closed: AtomicBool::new(false),
            config,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Returns the page cache.
    #[must_use]
    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub(crate) fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Switches the log between master and slave roles.
    ///
    /// Demoting requires a master log id, either passed here or already
    /// recorded. Promoting keeps the recorded master log id so that slaves of
    /// the old master can follow this log.
    ///
    /// # Errors
    ///
    /// Returns `RolledBack` on lock timeout, `LogClosed`, or an error if the
    /// header cannot be written.
    pub fn set_slave(&self, slave: bool, master_log_id: Option<Uuid>) -> CoreResult<LogInfo> {
        self.ensure_open()?;
        let modify = self.locks.lock_modify()?;
        let commit = self.locks.lock_commit()?;

        let mut info = *self.info.read();
        if let Some(id) = master_log_id {
            info.master_log_id = Some(id);
        }
        if slave && info.master_log_id.is_none() {
            return Err(CoreError::invalid_operation(
                "a slave log needs the id of its master",
            ));
        }
        info.slave = slave;

        write_header(&mut **self.backend.lock(), &info, self.config.page_size)?;
        *self.info.write() = info;
        tracing::info!(log_id = %info.log_id, slave, "log role changed");

        commit.unlock();
        modify.unlock();
        Ok(info)
    }

    /// Syncs the backend and records `checkpoint = next`.
    ///
    /// # Errors
    ///
    /// Returns `RolledBack` on lock timeout, `LogClosed`, or an I/O error.
    pub fn checkpoint(&self) -> CoreResult<LogInfo> {
        self.ensure_open()?;
        let modify = self.locks.lock_modify()?;

        let mut info = *self.info.read();
        info.checkpoint = info.next;
        {
            let mut backend = self.backend.lock();
            backend.sync()?;
            write_header(&mut **backend, &info, self.config.page_size)?;
        }
        *self.info.write() = info;
        tracing::debug!(checkpoint = info.checkpoint.0, "checkpoint written");

        modify.unlock();
        Ok(info)
    }

    /// Copies the latest committed image of `page_id` into `buf`.
    ///
    /// The caller must hold the read lock or the modify lock so that no
    /// commit runs concurrently.
    pub(crate) fn read_committed(&self, page_id: PageId, buf: &mut [u8]) -> CoreResult<bool> {
        let page_size = self.config.page_size;
        if buf.len() < page_size {
            return Err(CoreError::invalid_operation(format!(
                "read buffer of {} bytes is smaller than a page",
                buf.len()
            )));
        }
        if self.cache.get_page(page_id, buf) {
            return Ok(true);
        }

        let pos = match self.page_index.read().get(&page_id) {
            Some(pos) => *pos,
            None => return Ok(false),
        };
        let page = self
            .backend
            .lock()
            .read_at(page_offset(pos, page_size), page_size)?;
        buf[..page_size].copy_from_slice(&page);
        self.cache.put_page(page_id, &page);
        Ok(true)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CoreError::LogClosed)
        } else {
            Ok(())
        }
    }

    fn publish(&self, ticket: &ModifyTicket<'_>, count: u64) -> CoreResult<LogInfo> {
        self.ensure_open()?;
        if count == 0 {
            return Err(CoreError::invalid_operation(
                "cannot commit a transaction without pages",
            ));
        }
        if ticket.appended() != count {
            return Err(CoreError::invalid_operation(format!(
                "commit of {count} pages but {} were appended",
                ticket.appended()
            )));
        }

        let page_size = self.config.page_size;
        let start = ticket.start_info().next;
        let commit = self.locks.lock_commit()?;

        let bytes = self
            .backend
            .lock()
            .read_at(page_offset(start, page_size), count as usize * page_size)?;

        let mut live = Vec::new();
        let mut freed = Vec::new();
        let mut placements = Vec::with_capacity(count as usize);
        let mut data_length = 0u64;
        for (i, page) in bytes.chunks_exact(page_size).enumerate() {
            let pos = start.advance(i as u64);
            let header = verify_page(page)
                .map_err(|e| CoreError::transaction_corrupted(pos, e.to_string()))?;
            let page_id = PageId(header.page_id);
            // Replicated pages carry the master's trx ids.
            self.next_trx_id
                .fetch_max(header.trx_id.saturating_add(1), Ordering::Relaxed);
            if header.is_freed() {
                freed.extend_from_slice(page);
                placements.push((page_id, None));
            } else {
                data_length += u64::from(header.length);
                live.extend_from_slice(page);
                placements.push((page_id, Some(pos)));
            }
        }

        let mut info = *self.info.read();
        info.next = start.advance(count);
        info.data_length += data_length;
        write_header(&mut **self.backend.lock(), &info, page_size)?;

        {
            let mut index = self.page_index.write();
            for (page_id, pos) in placements {
                match pos {
                    Some(pos) => index.insert(page_id, pos),
                    None => index.remove(&page_id),
                };
            }
        }
        self.cache.put_pages(&live, live.len() / page_size);
        self.cache.remove_pages(&freed, freed.len() / page_size);
        *self.info.write() = info;

        commit.unlock();
        Ok(info)
    }
}

impl LogStorage for PagedLog {
    fn page_size(&self) -> usize {
        self.config.page_size
    }

    fn log_info(&self) -> CoreResult<LogInfo> {
        self.ensure_open()?;
        Ok(*self.info.read())
    }

    fn start_modify(&self) -> CoreResult<ModifyTicket<'_>> {
        self.ensure_open()?;
        let lock = self.locks.lock_modify()?;
        let info = *self.info.read();
        let trx_id = TrxId(self.next_trx_id.fetch_add(1, Ordering::Relaxed));
        Ok(ModifyTicket::new(lock, info, trx_id))
    }

    fn log_append(
        &self,
        ticket: &mut ModifyTicket<'_>,
        start: LogPageId,
        pages: &[u8],
        count: usize,
    ) -> CoreResult<()> {
        self.ensure_open()?;
        let expected = ticket.append_position();
        if start != expected {
            return Err(CoreError::invalid_operation(format!(
                "append at {start} but the transaction continues at {expected}"
            )));
        }
        let page_size = self.config.page_size;
        let len = count * page_size;
        if pages.len() < len {
            return Err(CoreError::invalid_operation(format!(
                "append of {count} pages from a {} byte buffer",
                pages.len()
            )));
        }
        if count == 0 {
            return Ok(());
        }

        {
            let mut backend = self.backend.lock();
            backend.write_at(page_offset(start, page_size), &pages[..len])?;
            backend.flush()?;
            if self.config.sync_on_write {
                backend.sync()?;
            }
        }
        ticket.record_append(count as u64);
        Ok(())
    }

    fn commit_modify(&self, ticket: ModifyTicket<'_>, count: u64) -> CoreResult<LogInfo> {
        match self.publish(&ticket, count) {
            Ok(info) => {
                tracing::debug!(
                    trx = %ticket.trx_id(),
                    pages = count,
                    next = info.next.0,
                    "committed"
                );
                ticket.release();
                Ok(info)
            }
            Err(err) => {
                tracing::warn!(trx = %ticket.trx_id(), error = %err, "commit failed");
                self.rollback_modify(ticket);
                Err(err)
            }
        }
    }

    fn rollback_modify(&self, ticket: ModifyTicket<'_>) {
        let keep = page_offset(ticket.start_info().next, self.config.page_size);
        {
            let mut backend = self.backend.lock();
            match backend.size() {
                Ok(size) if size > keep => {
                    if let Err(err) = backend.truncate(keep) {
                        tracing::warn!(error = %err, "failed to discard rolled back pages");
                    }
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "failed to read log size"),
            }
        }
        tracing::debug!(
            trx = %ticket.trx_id(),
            discarded = ticket.appended(),
            "rolled back"
        );
        ticket.release();
    }

    fn log_buffer(&self) -> MutexGuard<'_, LogBuffer> {
        self.buffer.lock()
    }

    fn admin_log_read(&self, start: LogPageId, buf: &mut [u8], count: usize) -> CoreResult<()> {
        self.ensure_open()?;
        let info = *self.info.read();
        let end = start.advance(count as u64);
        if start < info.start || end > info.next {
            return Err(CoreError::invalid_operation(format!(
                "log pages {start}..{end} are outside the committed range {}..{}",
                info.start, info.next
            )));
        }

        let page_size = self.config.page_size;
        let len = count * page_size;
        if buf.len() < len {
            return Err(CoreError::invalid_operation(format!(
                "read of {count} pages into a {} byte buffer",
                buf.len()
            )));
        }
        if count == 0 {
            return Ok(());
        }
        let bytes = self.backend.lock().read_at(page_offset(start, page_size), len)?;
        buf[..len].copy_from_slice(&bytes);
        Ok(())
    }

    fn close(&self) -> CoreResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        let modify = self.locks.lock_modify()?;
        let commit = self.locks.lock_commit()?;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut info = *self.info.read();
        info.successful_stop = true;
        let written = write_header(&mut **self.backend.lock(), &info, self.config.page_size);
        if let Err(e) = written {
            // The clean-stop flag is not on disk, so a retry must write it.
            self.closed.store(false, Ordering::Release);
            return Err(e);
        }
        *self.info.write() = info;
        tracing::info!(log_id = %info.log_id, next = info.next.0, "log closed");

        commit.unlock();
        modify.unlock();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for PagedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedLog")
            .field("info", &*self.info.read())
            .field("page_size", &self.config.page_size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn page_offset(pos: LogPageId, page_size: usize) -> u64 {
    (pos.0 + 1) * page_size as u64
}

fn write_header(
    backend: &mut dyn StorageBackend,
    info: &LogInfo,
    page_size: usize,
) -> CoreResult<()> {
    let mut body = info.encode();
    body.extend_from_slice(&(page_size as u32).to_le_bytes());

    let mut page = vec![0u8; page_size];
    seal_page(&mut page, 0, 0, &body)?;
    backend.write_at(0, &page)?;
    backend.flush()?;
    backend.sync()?;
    Ok(())
}

fn read_header(backend: &dyn StorageBackend, page_size: usize) -> CoreResult<LogInfo> {
    let page = backend
        .read_at(0, page_size)
        .map_err(|e| CoreError::invalid_format(format!("missing log header: {e}")))?;
    let header = verify_page(&page)
        .map_err(|e| CoreError::invalid_format(format!("log header page: {e}")))?;
    let body = page_body(&page, &header)?;
    if body.len() != LOG_HEADER_SIZE + 4 {
        return Err(CoreError::invalid_format(format!(
            "log header body has {} bytes",
            body.len()
        )));
    }

    let info = LogInfo::decode(&body[..LOG_HEADER_SIZE])?;
    let mut stored = [0u8; 4];
    stored.copy_from_slice(&body[LOG_HEADER_SIZE..]);
    let stored = u32::from_le_bytes(stored) as usize;
    if stored != page_size {
        return Err(CoreError::invalid_format(format!(
            "log was written with page size {stored}, configured {page_size}"
        )));
    }
    Ok(info)
}
