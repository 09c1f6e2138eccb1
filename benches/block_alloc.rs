//! Benchmarks for the block allocator

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pdomdb::Database;
use tempfile::TempDir;

fn bench_malloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("malloc_free");

    for size in [8, 100, 1000, 4000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let db = Database::builder().exclusive(true).open(dir.path().join("alloc.pdom")).unwrap();
            b.iter(|| {
                let record = db.malloc(black_box(size)).unwrap();
                db.free(record).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_mixed_sizes(c: &mut Criterion) {
    c.bench_function("malloc_mixed_sizes", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let db = Database::builder().exclusive(true).open(dir.path().join("mixed.pdom")).unwrap();
                (dir, db)
            },
            |(_dir, db)| {
                let mut live = Vec::with_capacity(1000);
                for i in 0..1000usize {
                    live.push(db.malloc(1 + (i * 131) % 900).unwrap());
                    if i % 3 == 0 {
                        let victim = live.swap_remove(i % live.len());
                        db.free(victim).unwrap();
                    }
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_malloc_free, bench_mixed_sizes);
criterion_main!(benches);
