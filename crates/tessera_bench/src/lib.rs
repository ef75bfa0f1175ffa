//! Benchmark utilities.

use rand::Rng;
use std::time::Duration;
use tessera_core::{PageId, PagedLog, StorageConfig};
use tessera_storage::InMemoryBackend;

/// Generate a random page body of the specified size.
pub fn random_body(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` random page ids below `max`.
pub fn random_page_ids(count: usize, max: u64) -> Vec<PageId> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| PageId(rng.gen_range(0..max))).collect()
}

/// Storage configuration for benchmarks.
pub fn bench_config(page_size: usize) -> StorageConfig {
    StorageConfig::new()
        .page_size(page_size)
        .cache_size(1024)
        .cache_banks(8)
        .log_buffer_pages(64)
        .lock_timeout(Duration::from_secs(10))
        .sync_on_write(false)
}

/// Create an in-memory log holding `pages` committed single-page
/// transactions.
///
/// # Panics
///
/// Panics if the log cannot be created or written.
pub fn populated_log(page_size: usize, pages: u64) -> PagedLog {
    let log = PagedLog::create(Box::new(InMemoryBackend::new()), bench_config(page_size))
        .expect("Failed to create log");
    let body = random_body(page_size / 2);
    for i in 0..pages {
        let mut trx = log.begin_modify().expect("Failed to begin");
        trx.write_page(PageId(i % 256), &body).expect("Failed to write");
        trx.commit().expect("Failed to commit");
    }
    log
}
