//! Pulling pages from the master into a [`TrxDestination`].

use crate::destination::TrxDestination;
use crate::error::{ReplicationError, ReplicationResult};
use crate::transport::MasterClient;
use tessera_core::{LogPageId, LogStorage};

/// Reads a run of log pages from a master, one page at a time.
pub struct TrxReader<'c, C: MasterClient + ?Sized> {
    client: &'c mut C,
    scratch: Vec<u8>,
}

impl<'c, C: MasterClient + ?Sized> TrxReader<'c, C> {
    /// Creates a reader for pages of `page_size` bytes.
    pub fn new(client: &'c mut C, page_size: usize) -> Self {
        Self {
            client,
            scratch: vec![0u8; page_size],
        }
    }

    /// Requests up to `max_pages` pages at `dest.next()` and writes each into
    /// `dest`. Returns the number of pages transferred.
    ///
    /// The destination is not flushed.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::PageSizeMismatch`] if the master's pages
    /// differ in size, or any transport or destination error.
    pub fn transfer<S: LogStorage + ?Sized>(
        &mut self,
        max_pages: u32,
        dest: &mut TrxDestination<'_, '_, S>,
    ) -> ReplicationResult<u64> {
        let start: LogPageId = dest.next();
        let run = self.client.read_log(start, max_pages)?;
        if run.page_size != self.scratch.len() {
            return Err(ReplicationError::PageSizeMismatch {
                local: self.scratch.len(),
                remote: run.page_size,
            });
        }

        for _ in 0..run.count {
            self.client.read_page(&mut self.scratch)?;
            dest.write(&self.scratch)?;
        }
        tracing::trace!(%start, pages = run.count, "page run transferred");
        Ok(u64::from(run.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{AbortHandle, LastPage, PageRun};
    use std::collections::VecDeque;
    use tessera_core::{ModifyScope, PagedLog, StorageConfig};
    use tessera_storage::{seal_page, InMemoryBackend};
    use uuid::Uuid;

    const PAGE: usize = 256;

    struct ScriptedClient {
        page_size: usize,
        pages: Vec<Vec<u8>>,
        pending: VecDeque<Vec<u8>>,
        fail_after: Option<usize>,
        served: usize,
    }

    impl ScriptedClient {
        fn new(count: u64) -> Self {
            let pages = (0..count)
                .map(|id| {
                    let mut buf = vec![0u8; PAGE];
                    seal_page(&mut buf, id, id + 1, b"replicated").unwrap();
                    buf
                })
                .collect();
            Self {
                page_size: PAGE,
                pages,
                pending: VecDeque::new(),
                fail_after: None,
                served: 0,
            }
        }
    }

    impl MasterClient for ScriptedClient {
        fn check_last_log(&mut self, _: Uuid, _: LogPageId, _: Option<LastPage>) -> ReplicationResult<()> {
            Ok(())
        }

        fn sync_log(&mut self, _: LogPageId) -> ReplicationResult<LogPageId> {
            Ok(LogPageId(self.pages.len() as u64))
        }

        fn read_log(&mut self, start: LogPageId, max_pages: u32) -> ReplicationResult<PageRun> {
            let from = start.0 as usize;
            let to = (from + max_pages as usize).min(self.pages.len());
            self.pending = self.pages[from..to].iter().cloned().collect();
            Ok(PageRun {
                start,
                count: (to - from) as u32,
                page_size: self.page_size,
            })
        }

        fn read_page(&mut self, buf: &mut [u8]) -> ReplicationResult<()> {
            if self.fail_after == Some(self.served) {
                return Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into());
            }
            let page = self
                .pending
                .pop_front()
                .ok_or_else(|| ReplicationError::unexpected("no page"))?;
            buf.copy_from_slice(&page);
            self.served += 1;
            Ok(())
        }

        fn abort_handle(&self) -> AbortHandle {
            AbortHandle::new()
        }
    }

    fn slave() -> PagedLog {
        let config = StorageConfig::new().page_size(PAGE).log_buffer_pages(3);
        PagedLog::create_slave(Box::new(InMemoryBackend::new()), config, Uuid::new_v4()).unwrap()
    }

    #[test]
    fn transfers_requested_run() {
        let log = slave();
        let mut client = ScriptedClient::new(10);
        let mut scope = ModifyScope::begin(&log).unwrap();
        let count = {
            let mut dest = TrxDestination::new(&mut scope);
            let count = TrxReader::new(&mut client, PAGE).transfer(7, &mut dest).unwrap();
            dest.flush().unwrap();
            count
        };
        assert_eq!(count, 7);
        assert_eq!(scope.commit(count).unwrap().next, LogPageId(7));

        let mut master_page = vec![0u8; PAGE];
        log.admin_log_read(LogPageId(6), &mut master_page, 1).unwrap();
        assert_eq!(master_page, client.pages[6]);
    }

    #[test]
    fn page_size_mismatch_is_rejected() {
        let log = slave();
        let mut client = ScriptedClient::new(2);
        client.page_size = 512;
        let mut scope = ModifyScope::begin(&log).unwrap();
        let mut dest = TrxDestination::new(&mut scope);
        let err = TrxReader::new(&mut client, PAGE)
            .transfer(2, &mut dest)
            .unwrap_err();
        assert!(matches!(err, ReplicationError::PageSizeMismatch { local: 256, remote: 512 }));
    }

    #[test]
    fn failure_mid_run_leaves_log_unchanged() {
        let log = slave();
        let mut client = ScriptedClient::new(10);
        client.fail_after = Some(5);
        {
            let mut scope = ModifyScope::begin(&log).unwrap();
            let mut dest = TrxDestination::new(&mut scope);
            assert!(TrxReader::new(&mut client, PAGE).transfer(10, &mut dest).is_err());
            assert_eq!(dest.written(), 5);
        }
        assert_eq!(log.log_info().unwrap().next, LogPageId(0));
    }
}
