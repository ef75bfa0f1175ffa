//! Storage configuration.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tessera_storage::MIN_PAGE_SIZE;

/// Configuration for opening a log and its page cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Size of every data page and log page in bytes.
    pub page_size: usize,

    /// Number of pages the cache holds (0 disables the cache).
    pub cache_size: usize,

    /// Requested number of cache banks.
    pub cache_banks: usize,

    /// Upper bound on every lock acquisition.
    pub lock_timeout: Duration,

    /// Capacity of the shared log staging buffer, in pages.
    pub log_buffer_pages: usize,

    /// Whether to sync the backend after every log append.
    pub sync_on_write: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            cache_size: 1024,
            cache_banks: 16,
            lock_timeout: Duration::from_secs(30),
            log_buffer_pages: 64,
            sync_on_write: true,
        }
    }
}

impl StorageConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the cache size in pages.
    #[must_use]
    pub const fn cache_size(mut self, pages: usize) -> Self {
        self.cache_size = pages;
        self
    }

    /// Sets the requested number of cache banks.
    #[must_use]
    pub const fn cache_banks(mut self, banks: usize) -> Self {
        self.cache_banks = banks;
        self
    }

    /// Sets the lock timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the log staging buffer capacity in pages.
    #[must_use]
    pub const fn log_buffer_pages(mut self, pages: usize) -> Self {
        self.log_buffer_pages = pages;
        self
    }

    /// Sets whether to sync after every log append.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] describing the first bad value.
    pub fn validate(&self) -> CoreResult<()> {
        if self.page_size < MIN_PAGE_SIZE {
            return Err(CoreError::invalid_config(format!(
                "page_size {} is below the minimum of {}",
                self.page_size, MIN_PAGE_SIZE
            )));
        }
        if self.page_size > u32::MAX as usize {
            return Err(CoreError::invalid_config("page_size does not fit in 32 bits"));
        }
        if self.cache_size > 0 && self.cache_banks == 0 {
            return Err(CoreError::invalid_config(
                "cache_banks must be at least 1 when the cache is enabled",
            ));
        }
        if self.log_buffer_pages == 0 {
            return Err(CoreError::invalid_config("log_buffer_pages must be at least 1"));
        }
        if self.lock_timeout.is_zero() {
            return Err(CoreError::invalid_config("lock_timeout must be positive"));
        }
        Ok(())
    }
}
