//! Basic benchmarks for the `alloc_aware` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use alloc_aware::{HashMap, HashTable, SmallVec};
use criterion::{Criterion, criterion_group, criterion_main};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: alloc_tracker::Allocator<std::alloc::System> = alloc_tracker::Allocator::system();

const TABLE_SIZE: u64 = 10_000;

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("collections_basic");

    let allocs_op = allocs.operation("small_vec_push_inline");
    group.bench_function("small_vec_push_inline", |b| {
        b.iter_custom(|iters| {
            let mut vecs = iter::repeat_with(SmallVec::<u32>::new)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for items in &mut vecs {
                for i in 0..4 {
                    items.push(black_box(i));
                }
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("small_vec_push_1000");
    group.bench_function("small_vec_push_1000", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let mut items = SmallVec::<u64>::new();

                for i in 0..1000 {
                    items.push(black_box(i));
                }

                drop(black_box(items));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("hash_table_insert_10k");
    group.bench_function("hash_table_insert_10k", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let mut table = HashTable::<u64>::new();

                for i in 0..TABLE_SIZE {
                    table.insert(black_box(i));
                }

                drop(black_box(table));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("hash_table_lookup_hit");
    group.bench_function("hash_table_lookup_hit", |b| {
        b.iter_custom(|iters| {
            let table: HashTable<u64> = (0..TABLE_SIZE).collect();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for i in 0..iters {
                _ = black_box(table.contains(&black_box(i % TABLE_SIZE)));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("hash_table_lookup_after_churn");
    group.bench_function("hash_table_lookup_after_churn", |b| {
        b.iter_custom(|iters| {
            // Removing every other value leaves a tombstone-dense table.
            let mut table: HashTable<u64> = (0..TABLE_SIZE).collect();
            for i in (0..TABLE_SIZE).step_by(2) {
                table.remove(&i);
            }

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for i in 0..iters {
                _ = black_box(table.contains(&black_box(i % TABLE_SIZE)));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("hash_map_overwrite");
    group.bench_function("hash_map_overwrite", |b| {
        b.iter_custom(|iters| {
            let mut map: HashMap<u64, u64> = (0..TABLE_SIZE).map(|i| (i, i)).collect();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for i in 0..iters {
                _ = black_box(map.insert(black_box(i % TABLE_SIZE), i));
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
