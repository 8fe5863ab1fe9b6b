//! Sector pool allocate/free hot-path benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use evo_store::pool::SectorPool;

fn bench_allocate_free_round_trip(c: &mut Criterion) {
    let pool = SectorPool::new(2048);
    c.bench_function("allocate_free_round_trip", |b| {
        b.iter(|| {
            let id = black_box(pool.allocate().unwrap());
            pool.free(id);
        });
    });
}

fn bench_allocate_until_exhausted(c: &mut Criterion) {
    c.bench_function("allocate_until_exhausted_2048", |b| {
        b.iter(|| {
            let pool = SectorPool::new(2048);
            while let Some(id) = pool.allocate() {
                black_box(id);
            }
        });
    });
}

fn bench_occupancy_percent(c: &mut Criterion) {
    let pool = SectorPool::new(2048);
    for _ in 0..1600 {
        pool.allocate();
    }
    c.bench_function("occupancy_percent", |b| {
        b.iter(|| black_box(pool.occupancy_percent()));
    });
}

criterion_group!(
    benches,
    bench_allocate_free_round_trip,
    bench_allocate_until_exhausted,
    bench_occupancy_percent
);
criterion_main!(benches);
