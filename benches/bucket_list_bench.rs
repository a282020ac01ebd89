// benches/bucket_list_bench.rs

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;

use split_list::{BucketList, Config};

// Single-threaded benchmarks
fn bench_single_threaded(c: &mut Criterion) {
    let mut group = c.benchmark_group("BucketList-SingleThreaded");

    // Benchmark insertion
    group.bench_function("add", |b| {
        let list = BucketList::new();
        let mut i: u64 = 0;

        b.iter(|| {
            i = i.wrapping_add(1);
            list.add(black_box(i))
        });
    });

    // Benchmark lookup
    group.bench_function("contains", |b| {
        let list = BucketList::new();

        // Populate the list first
        for i in 0..1000u64 {
            list.add(i);
        }

        let mut i = 0u64;
        b.iter(|| {
            i = (i + 1) % 1000;
            list.contains(black_box(&i))
        });
    });

    // Benchmark removal
    group.bench_function("remove", |b| {
        let list = BucketList::new();
        for i in 0..1000u64 {
            list.add(i);
        }
        let mut next = 0u64;

        b.iter_batched(
            // Setup for each iteration: put back the element about to be removed
            || {
                next = (next + 1) % 1000;
                list.add(next);
                next
            },
            // Actual benchmark
            |i| list.remove(black_box(&i)),
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

// Lookups through bucket views versus from the head
fn bench_bucket_views(c: &mut Criterion) {
    let mut group = c.benchmark_group("BucketList-Views");

    for buckets in [1u32, 16, 256].iter() {
        group.bench_with_input(
            BenchmarkId::new("contains_via_anchor", buckets),
            buckets,
            |b, &buckets| {
                let list = BucketList::new();
                let views: Vec<_> = (0..buckets).map(|i| list.get_anchor(i).unwrap()).collect();

                for i in 0..4096u64 {
                    list.add(i);
                }

                let mut i = 0u64;
                b.iter(|| {
                    i = (i + 1) % 4096;
                    let bucket = list.restricted_hash_of(&i) % buckets;
                    views[bucket as usize].contains(black_box(&i))
                });
            },
        );
    }

    group.finish();
}

// Multi-threaded benchmark comparison
fn bench_multi_threaded(c: &mut Criterion) {
    let mut group = c.benchmark_group("BucketList-MultiThreaded");

    // Test with different thread counts
    for thread_count in [1, 2, 4, 8].iter() {
        group.bench_with_input(
            BenchmarkId::new("mixed_operations", thread_count),
            thread_count,
            |b, &num_threads| {
                b.iter_batched(
                    // Setup
                    || Arc::new(BucketList::<u64>::with_config(Config::default())),
                    // Benchmark
                    |list| {
                        use rand::prelude::*;
                        use std::sync::Barrier;
                        use std::thread;

                        let ops_per_thread = 1000;
                        let barrier = Arc::new(Barrier::new(num_threads as usize));

                        let mut handles = Vec::new();

                        for _ in 0..num_threads {
                            let list = Arc::clone(&list);
                            let barrier = Arc::clone(&barrier);

                            let handle = thread::spawn(move || {
                                let mut rng = rand::rng();

                                // Wait for all threads to be ready
                                barrier.wait();

                                for _ in 0..ops_per_thread {
                                    let value = rng.random::<u64>() % 4096;

                                    // Randomly choose operation: 40% add, 30% remove, 30% contains
                                    let op = rng.random::<u8>() % 100;

                                    if op < 40 {
                                        list.add(value);
                                    } else if op < 70 {
                                        list.remove(&value);
                                    } else {
                                        list.contains(&value);
                                    }
                                }
                            });

                            handles.push(handle);
                        }

                        for handle in handles {
                            if let Err(e) = handle.join() {
                                eprintln!("Thread panicked: {:?}", e);
                            }
                        }
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_single_threaded,
    bench_bucket_views,
    bench_multi_threaded
);
criterion_main!(benches);
