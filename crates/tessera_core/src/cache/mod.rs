//! Sharded page cache.
//!
//! The cache maps page ids to page bytes across a fixed number of banks. Slot
//! selection uses modulo arithmetic on the page id, so capacity need not be a
//! power of two. Page id 0 lives in its own one-page slot and is never evicted
//! by writes to other ids.

mod bank;

use crate::config::StorageConfig;
use crate::types::PageId;
use bank::{CacheBank, EMPTY};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_storage::PageHeader;

/// Largest byte buffer a single bank may address.
const MAX_BANK_BYTES: usize = i32::MAX as usize;

/// Hit/miss counters for a [`PageCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of `get_page` calls that found the page.
    pub hits: u64,
    /// Number of `get_page` calls that missed.
    pub misses: u64,
}

/// Fixed-capacity page cache shared by all transactions on a log.
///
/// A cache configured with size 0 is disabled: every lookup misses and every
/// mutation is a no-op.
pub struct PageCache {
    page_size: usize,
    total_slots: usize,
    bank_size: usize,
    banks: Box<[CacheBank]>,
    zero_page: Mutex<Option<Box<[u8]>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PageCache {
    /// Creates a cache of `cache_size` pages spread over at least
    /// `bank_count` banks.
    #[must_use]
    pub fn new(page_size: usize, cache_size: usize, bank_count: usize) -> Self {
        if cache_size == 0 || page_size == 0 {
            return Self {
                page_size,
                total_slots: 0,
                bank_size: 0,
                banks: Box::new([]),
                zero_page: Mutex::new(None),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            };
        }

        let max_bank_size = (MAX_BANK_BYTES / page_size).max(1);
        let needed = cache_size.div_ceil(max_bank_size);
        let requested = bank_count.max(needed).clamp(1, cache_size);
        let bank_size = cache_size.div_ceil(requested);
        let bank_count = cache_size.div_ceil(bank_size);

        let banks = (0..bank_count)
            .map(|b| {
                let start = b * bank_size;
                let len = bank_size.min(cache_size.saturating_sub(start));
                CacheBank::new(len, page_size)
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            page_size,
            total_slots: cache_size,
            bank_size,
            banks,
            zero_page: Mutex::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache sized from a [`StorageConfig`].
    #[must_use]
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.page_size, config.cache_size, config.cache_banks)
    }

    /// Returns true if the cache holds any slots.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.total_slots > 0
    }

    /// Returns the number of page slots, not counting the zero page.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.total_slots
    }

    /// Returns the number of banks.
    #[must_use]
    pub fn bank_count(&self) -> usize {
        self.banks.len()
    }

    /// Returns the page size in bytes.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn locate(&self, page_id: u64) -> (usize, usize) {
        let index = (page_id % self.total_slots as u64) as usize;
        (index / self.bank_size, index % self.bank_size)
    }

    /// Copies the cached bytes of `page_id` into `dest`.
    ///
    /// Returns whether the page was found. `dest` must hold at least one page.
    pub fn get_page(&self, page_id: PageId, dest: &mut [u8]) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let hit = if page_id == PageId::ZERO {
            match self.zero_page.lock().as_deref() {
                Some(page) => {
                    dest[..self.page_size].copy_from_slice(page);
                    true
                }
                None => false,
            }
        } else {
            let (bank, slot) = self.locate(page_id.0);
            self.banks[bank].get(slot, page_id.0, dest)
        };

        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Inserts or overwrites the entry for `page_id` with the first page of
    /// `src`.
    pub fn put_page(&self, page_id: PageId, src: &[u8]) {
        if !self.is_enabled() || page_id.0 == EMPTY {
            return;
        }
        if page_id == PageId::ZERO {
            let mut zero = self.zero_page.lock();
            match zero.as_mut() {
                Some(page) => page.copy_from_slice(&src[..self.page_size]),
                None => *zero = Some(src[..self.page_size].to_vec().into_boxed_slice()),
            }
            return;
        }
        let (bank, slot) = self.locate(page_id.0);
        self.banks[bank].put(slot, page_id.0, src);
    }

    /// Drops the entry for `page_id` if present.
    pub fn remove_page(&self, page_id: PageId) -> bool {
        if !self.is_enabled() {
            return false;
        }
        if page_id == PageId::ZERO {
            return self.zero_page.lock().take().is_some();
        }
        let (bank, slot) = self.locate(page_id.0);
        self.banks[bank].remove(slot, page_id.0)
    }

    /// Caches `count` consecutive page images from `buf`, keyed by the page
    /// id in each page header.
    pub fn put_pages(&self, buf: &[u8], count: usize) {
        if !self.is_enabled() {
            return;
        }
        for page in buf.chunks_exact(self.page_size).take(count) {
            if let Ok(header) = PageHeader::decode(page) {
                self.put_page(PageId(header.page_id), page);
            }
        }
    }

    /// Invalidates the pages whose headers appear in the `count` consecutive
    /// page images of `buf`.
    pub fn remove_pages(&self, buf: &[u8], count: usize) {
        if !self.is_enabled() {
            return;
        }
        for page in buf.chunks_exact(self.page_size).take(count) {
            if let Ok(header) = PageHeader::decode(page) {
                self.remove_page(PageId(header.page_id));
            }
        }
    }

    /// Empties every slot.
    pub fn clear(&self) {
        for bank in self.banks.iter() {
            bank.clear();
        }
        *self.zero_page.lock() = None;
    }

    /// Returns the hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn slots_per_bank(&self) -> Vec<usize> {
        self.banks.iter().map(CacheBank::slot_count).collect()
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("page_size", &self.page_size)
            .field("total_slots", &self.total_slots)
            .field("banks", &self.banks.len())
            .field("stats", &self.stats())
            .finish()
    }
}
