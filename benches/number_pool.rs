//! Benchmark for number pool allocation
//!
//! Target: sub-microsecond allocation with a densely used minor range

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use storage_controller_db::numberpool::{NumberPool, NumberPoolsConfig, PoolKind};

fn minor_pool() -> NumberPool {
    NumberPool::new(PoolKind::Minor, NumberPoolsConfig::default().minor)
}

fn bench_allocate_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("number_pool");
    group.throughput(Throughput::Elements(1));

    group.bench_function("allocate_release", |b| {
        let mut pool = minor_pool();
        b.iter(|| {
            if let Ok(value) = pool.allocate() {
                pool.release(black_box(value));
            }
        });
    });

    group.finish();
}

fn bench_allocate_fragmented(c: &mut Criterion) {
    let mut group = c.benchmark_group("number_pool");
    group.throughput(Throughput::Elements(1));

    // Every other minor in use
    let mut pool = minor_pool();
    for value in (1000..49000).step_by(2) {
        let _ = pool.allocate_explicit(value);
    }
    pool.commit();

    group.bench_function("allocate_fragmented", |b| {
        b.iter(|| {
            let mut pool = pool.clone();
            for _ in 0..100 {
                let _ = black_box(pool.allocate());
            }
        });
    });

    group.finish();
}

fn bench_rollback(c: &mut Criterion) {
    let mut group = c.benchmark_group("number_pool");
    group.throughput(Throughput::Elements(100));

    group.bench_function("allocate_100_rollback", |b| {
        let mut pool = minor_pool();
        b.iter(|| {
            for _ in 0..100 {
                let _ = pool.allocate();
            }
            pool.rollback();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_allocate_release, bench_allocate_fragmented, bench_rollback);
criterion_main!(benches);
