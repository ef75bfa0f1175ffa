//! Paged log benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use tempfile::TempDir;
use tessera_bench::{bench_config, populated_log, random_body, random_page_ids};
use tessera_core::{LogPageId, LogStorage, PageId, PagedLog};
use tessera_storage::{FileBackend, InMemoryBackend};

/// Benchmark commits of transactions of various sizes.
fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");

    for pages in [1usize, 16, 128].iter() {
        group.throughput(Throughput::Elements(*pages as u64));
        group.bench_with_input(BenchmarkId::new("inmemory", pages), pages, |b, &pages| {
            let log = PagedLog::create(Box::new(InMemoryBackend::new()), bench_config(4096))
                .unwrap();
            let body = random_body(2048);

            b.iter(|| {
                let mut trx = log.begin_modify().unwrap();
                for i in 0..pages {
                    trx.write_page(PageId(i as u64), &body).unwrap();
                }
                black_box(trx.commit().unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark synced commits to a file.
fn bench_commit_file(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_file");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(5));

    for sync in [false, true].iter() {
        group.bench_with_input(BenchmarkId::new("sync", sync), sync, |b, &sync| {
            let temp_dir = TempDir::new().unwrap();
            let backend = FileBackend::open(&temp_dir.path().join("bench.log")).unwrap();
            let log = PagedLog::create(Box::new(backend), bench_config(4096).sync_on_write(sync))
                .unwrap();
            let body = random_body(1024);

            b.iter(|| {
                let mut trx = log.begin_modify().unwrap();
                trx.write_page(PageId(1), &body).unwrap();
                black_box(trx.commit().unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark point reads, warm and cold cache.
fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    let log = populated_log(4096, 4096);
    let ids = random_page_ids(1000, 256);

    group.bench_function("warm", |b| {
        let mut idx = 0;
        b.iter(|| {
            let trx = log.begin_read().unwrap();
            black_box(trx.read(ids[idx]).unwrap());
            idx = (idx + 1) % ids.len();
        });
    });

    group.bench_function("cold", |b| {
        let mut idx = 0;
        b.iter(|| {
            log.cache().clear();
            let trx = log.begin_read().unwrap();
            black_box(trx.read(ids[idx]).unwrap());
            idx = (idx + 1) % ids.len();
        });
    });

    group.finish();
}

/// Benchmark raw log page reads as served to slaves.
fn bench_admin_log_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("admin_log_read");
    let log = populated_log(4096, 2048);

    for count in [1usize, 64, 512].iter() {
        group.throughput(Throughput::Bytes((count * 4096) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let mut buf = vec![0u8; count * 4096];
            b.iter(|| {
                log.admin_log_read(black_box(LogPageId(100)), &mut buf, count)
                    .unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_commit,
    bench_commit_file,
    bench_read,
    bench_admin_log_read
);
criterion_main!(benches);
