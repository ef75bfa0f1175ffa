//! Page cache benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tessera_bench::{random_body, random_page_ids};
use tessera_core::{PageCache, PageId};

/// Benchmark cache hits across page sizes.
fn bench_cache_get_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_get_hit");

    for page_size in [512, 4096, 16384].iter() {
        group.throughput(Throughput::Bytes(*page_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(page_size),
            page_size,
            |b, &page_size| {
                let cache = PageCache::new(page_size, 1024, 8);
                let page = random_body(page_size);
                for id in 0..1024 {
                    cache.put_page(PageId(id), &page);
                }
                let mut dest = vec![0u8; page_size];
                let mut id = 0u64;

                b.iter(|| {
                    let hit = cache.get_page(black_box(PageId(id)), &mut dest);
                    id = (id + 1) % 1024;
                    black_box(hit);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark puts to random ids, most of which collide.
fn bench_cache_put_random(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_put_random");

    for banks in [1, 4, 16].iter() {
        group.bench_with_input(BenchmarkId::new("banks", banks), banks, |b, &banks| {
            let cache = PageCache::new(4096, 1024, banks);
            let page = random_body(4096);
            let ids = random_page_ids(10_000, 1 << 20);
            let mut idx = 0;

            b.iter(|| {
                cache.put_page(black_box(ids[idx]), &page);
                idx = (idx + 1) % ids.len();
            });
        });
    }

    group.finish();
}

/// Benchmark misses on a disabled cache.
fn bench_cache_disabled(c: &mut Criterion) {
    c.bench_function("cache_disabled_get", |b| {
        let cache = PageCache::new(4096, 0, 1);
        let mut dest = vec![0u8; 4096];
        b.iter(|| black_box(cache.get_page(black_box(PageId(7)), &mut dest)));
    });
}

criterion_group!(
    benches,
    bench_cache_get_hit,
    bench_cache_put_random,
    bench_cache_disabled
);
criterion_main!(benches);
