//! Stress helpers for the paged log.
//!
//! These drive the log under heavy load and concurrent access and report
//! throughput.

use crate::fixtures::page_contents;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tessera_core::{PageId, PagedLog};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Logs a summary of the run.
    pub fn log_summary(&self, name: &str) {
        tracing::info!(
            name,
            total = self.total_ops,
            successful = self.successful_ops,
            failed = self.failed_ops,
            duration_ms = self.duration.as_millis() as u64,
            ops_per_second = self.ops_per_second,
            "stress run finished"
        );
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Number of distinct page ids touched.
    pub page_count: u64,
    /// Pages written per modify transaction.
    pub pages_per_transaction: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            page_count: 128,
            pages_per_transaction: 1,
        }
    }
}

fn write_batch(log: &PagedLog, first: u64, seq: u64, config: &StressConfig) -> bool {
    let Ok(mut trx) = log.begin_modify() else {
        return false;
    };
    for i in 0..config.pages_per_transaction as u64 {
        let page_id = (first + i) % config.page_count.max(1);
        if trx
            .write_page(PageId(page_id), &page_contents(page_id, seq))
            .is_err()
        {
            trx.rollback();
            return false;
        }
    }
    trx.commit().is_ok()
}

/// Commits `operations` transactions from one thread.
pub fn stress_sequential_writes(log: &PagedLog, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        if write_batch(log, i as u64, i as u64, config) {
            successful += 1;
        } else {
            failed += 1;
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Commits from `threads` writers at once. Writers serialize on the modify
/// lock; none should time out under the default lock timeout.
pub fn stress_concurrent_writes(log: Arc<PagedLog>, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads.max(1);

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let log = Arc::clone(&log);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let config = config.clone();

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let seq = (t * ops_per_thread + i) as u64;
                    if write_batch(&log, seq, seq, &config) {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Runs one writer against `threads` readers.
///
/// A read counts as failed if it errors or returns a body that no commit
/// ever wrote for that page.
pub fn stress_readers_and_writer(log: Arc<PagedLog>, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads.max(1);

    let start = Instant::now();

    let writer = {
        let log = Arc::clone(&log);
        let config = config.clone();
        thread::spawn(move || {
            let mut failed = 0usize;
            for i in 0..config.operations {
                if !write_batch(&log, i as u64, i as u64, &config) {
                    failed += 1;
                }
            }
            failed
        })
    };

    let readers: Vec<_> = (0..config.threads)
        .map(|t| {
            let log = Arc::clone(&log);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let page_count = config.page_count.max(1);
            let operations = config.operations as u64;

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let page_id = ((t * ops_per_thread + i) as u64) % page_count;
                    let ok = match log.begin_read().and_then(|trx| trx.read(PageId(page_id))) {
                        Ok(None) => true,
                        Ok(Some(body)) => (0..operations)
                            .any(|seq| page_contents(page_id, seq) == body),
                        Err(_) => false,
                    };
                    if ok {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in readers {
        handle.join().expect("Reader panicked");
    }
    let writer_failures = writer.join().expect("Writer panicked");

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed) + writer_failures,
        start.elapsed(),
    )
}

/// Alternates committed and rolled-back transactions.
///
/// Rolled-back transactions count as failed; the log must only grow by the
/// committed ones.
pub fn stress_transaction_aborts(log: &PagedLog, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let page_id = i as u64 % config.page_count.max(1);
        let Ok(mut trx) = log.begin_modify() else {
            failed += 1;
            continue;
        };
        let written = trx
            .write_page(PageId(page_id), &page_contents(page_id, i as u64))
            .is_ok();

        if written && i % 2 == 1 {
            match trx.commit() {
                Ok(_) => successful += 1,
                Err(_) => failed += 1,
            }
        } else {
            trx.rollback();
            failed += 1;
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}
