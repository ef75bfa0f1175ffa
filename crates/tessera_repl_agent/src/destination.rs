//! Staging of replicated pages into the local log.

use crate::error::{ReplicationError, ReplicationResult};
use parking_lot::MutexGuard;
use tessera_core::{LogBuffer, LogPageId, LogStorage, ModifyScope};

/// Write-through staging of incoming log pages for one modify transaction.
///
/// Pages are accepted one at a time into the storage's log buffer and
/// appended to the log whenever the buffer fills, and on [`flush`].
///
/// [`flush`]: TrxDestination::flush
pub struct TrxDestination<'s, 'a, S: LogStorage + ?Sized> {
    scope: &'s mut ModifyScope<'a, S>,
    buffer: MutexGuard<'a, LogBuffer>,
    first: LogPageId,
    next: LogPageId,
    buffer_start: LogPageId,
}

impl<'s, 'a, S: LogStorage + ?Sized> TrxDestination<'s, 'a, S> {
    /// Stages pages at the scope's current append position.
    pub fn new(scope: &'s mut ModifyScope<'a, S>) -> Self {
        let buffer = scope.storage().log_buffer();
        let next = scope.ticket().append_position();
        Self {
            scope,
            buffer,
            first: next,
            next,
            buffer_start: next,
        }
    }

    /// Returns the log page id the next write will take.
    pub fn next(&self) -> LogPageId {
        self.next
    }

    /// Returns the oldest page not yet appended.
    pub fn buffer_start(&self) -> LogPageId {
        self.buffer_start
    }

    /// Returns the number of pages accepted.
    pub fn written(&self) -> u64 {
        self.next.distance_from(self.first)
    }

    /// Returns the number of pages buffered but not yet appended.
    pub fn buffered(&self) -> u64 {
        self.next.distance_from(self.buffer_start)
    }

    /// Accepts exactly one page.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::InvalidWrite`] unless `page` is exactly
    /// one page long, or an error from the append that makes room for it.
    pub fn write(&mut self, page: &[u8]) -> ReplicationResult<()> {
        let page_size = self.buffer.page_size();
        if page.len() != page_size {
            return Err(ReplicationError::InvalidWrite {
                len: page.len(),
                page_size,
            });
        }
        if self.buffered() >= self.buffer.capacity() as u64 {
            self.flush()?;
        }
        let slot = self.buffered() as usize;
        self.buffer.page_mut(slot).copy_from_slice(page);
        self.next = self.next.advance(1);
        Ok(())
    }

    /// Appends every buffered page to the log. Does nothing if none are
    /// buffered.
    ///
    /// # Errors
    ///
    /// Propagates append failures.
    pub fn flush(&mut self) -> ReplicationResult<()> {
        let count = self.buffered() as usize;
        if count == 0 {
            return Ok(());
        }
        self.scope
            .append(self.buffer_start, self.buffer.pages(count), count)?;
        self.buffer_start = self.next;
        Ok(())
    }
}
