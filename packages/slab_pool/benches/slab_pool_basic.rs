//! Basic benchmarks for the `slab_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use criterion::{Criterion, criterion_group, criterion_main};
use slab_pool::{ObjectPool, RawPool};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

type TestItem = usize;
const TEST_VALUE: TestItem = 1024;

// Enough items to fill several slabs of the default capacity.
const BATCH_SIZE: usize = 1000;

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("slab_pool_basic");

    group.bench_function("build_empty", |b| {
        b.iter(|| drop(black_box(ObjectPool::<TestItem>::new())));
    });

    group.bench_function("create_first", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(ObjectPool::<TestItem>::new)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.create(black_box(TEST_VALUE)));
            }

            start.elapsed()
        });
    });

    group.bench_function("create_second", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(ObjectPool::<TestItem>::new)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            // Pre-warm each pool with one item, so the slab already exists.
            for pool in &mut pools {
                _ = pool.create(TEST_VALUE);
            }

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.create(black_box(TEST_VALUE)));
            }

            start.elapsed()
        });
    });

    group.bench_function("alloc_free_churn", |b| {
        let mut pool = RawPool::<TestItem>::new();
        pool.reserve(1);

        b.iter(|| {
            let ptr = pool.alloc().unwrap();
            pool.free(black_box(ptr));
        });
    });

    group.bench_function("destroy_one", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(ObjectPool::<TestItem>::new)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let ptrs = pools
                .iter_mut()
                .map(|pool| pool.create(TEST_VALUE).unwrap())
                .collect::<Vec<_>>();

            let start = Instant::now();

            for (pool, ptr) in pools.iter_mut().zip(ptrs) {
                // SAFETY: Each pointer was created in the pool it is paired with.
                unsafe {
                    pool.destroy(black_box(ptr));
                }
            }

            start.elapsed()
        });
    });

    group.bench_function("iterate_sparse", |b| {
        let mut pool = ObjectPool::<TestItem>::new();

        let ptrs = (0..BATCH_SIZE)
            .map(|i| pool.create(i).unwrap())
            .collect::<Vec<_>>();

        // Leave every other item alive so iteration has to skip free cells.
        for ptr in ptrs.iter().step_by(2) {
            // SAFETY: Each pointer was created in this pool and is destroyed once.
            unsafe {
                pool.destroy(*ptr);
            }
        }

        b.iter(|| black_box(pool.iter().sum::<TestItem>()));
    });

    group.bench_function("shrink_after_drain", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(|| {
                let mut pool = RawPool::<TestItem>::new();
                pool.reserve(BATCH_SIZE);
                pool
            })
            .take(usize::try_from(iters).unwrap())
            .collect::<Vec<_>>();

            let start = Instant::now();

            for pool in &mut pools {
                pool.shrink();
            }

            start.elapsed()
        });
    });

    group.finish();
}
