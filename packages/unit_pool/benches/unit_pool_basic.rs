//! Basic benchmarks for the `unit_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::num::NonZero;
use std::time::Instant;

use criterion::{Criterion, criterion_group, criterion_main};
use new_zealand::nz;
use unit_pool::{PoolAllocator, UnitAllocator, UnitPool};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

type TestItem = usize;

const UNITS_PER_BLOCK: NonZero<usize> = nz!(64);

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("unit_pool_basic");

    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(
                    UnitPool::builder().layout_of::<TestItem>().build().unwrap(),
                ));
            }

            start.elapsed()
        });
    });

    // Every pool is empty, so every allocation acquires a block.
    group.bench_function("allocate_first", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(|| {
                UnitPool::builder()
                    .layout_of::<TestItem>()
                    .units_per_block(UNITS_PER_BLOCK)
                    .build()
                    .unwrap()
            })
            .take(usize::try_from(iters).unwrap())
            .collect::<Vec<_>>();

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.allocate().unwrap());
            }

            start.elapsed()
        });
    });

    // The free list is never empty, so this measures the reuse path only.
    for guarded in [false, true] {
        let name = if guarded {
            "allocate_release_guarded"
        } else {
            "allocate_release"
        };

        group.bench_function(name, |b| {
            b.iter_custom(|iters| {
                let mut pool = UnitPool::builder()
                    .layout_of::<TestItem>()
                    .units_per_block(UNITS_PER_BLOCK)
                    .guarded(guarded)
                    .build()
                    .unwrap();

                // Warm up so the pool already owns a block.
                let warm = pool.allocate().unwrap();
                // SAFETY: The unit came from this pool and is released once.
                unsafe { pool.deallocate(warm) }.unwrap();

                let start = Instant::now();

                for _ in 0..iters {
                    let unit = black_box(pool.allocate().unwrap());

                    // SAFETY: The unit came from this pool and is released once.
                    unsafe { pool.deallocate(unit) }.unwrap();
                }

                start.elapsed()
            });
        });
    }

    group.bench_function("allocator_round_trip", |b| {
        b.iter_custom(|iters| {
            let allocator = PoolAllocator::<TestItem>::new();

            let start = Instant::now();

            for _ in 0..iters {
                let storage = black_box(allocator.allocate(1).unwrap());

                // SAFETY: The storage came from an equal allocator on this thread.
                unsafe { allocator.deallocate(storage, 1) }.unwrap();
            }

            start.elapsed()
        });
    });

    group.finish();
}
