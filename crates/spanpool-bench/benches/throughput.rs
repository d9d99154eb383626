//! Allocator throughput benchmarks.
//!
//! Measures spanpool against the platform malloc over the workloads that
//! exercise each tier: fixed-size churn per class tier, a mixed-size
//! sweep, large-object page traffic, and a multi-threaded storm.

use std::hint::black_box;
use std::thread;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use spanpool::{MemoryPool, MAX_BYTES};

const OPS: u64 = 10_000;

fn pool_alloc_free(pool: &MemoryPool, size: usize) {
    for _ in 0..OPS {
        let p = pool.allocate(size);
        black_box(p);
        pool.deallocate(p, size);
    }
}

fn libc_alloc_free(size: usize) {
    for _ in 0..OPS {
        // SAFETY: malloc/free pair with no aliasing.
        unsafe {
            let p = libc::malloc(size);
            black_box(p);
            libc::free(p);
        }
    }
}

fn bench_fixed_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_free_fixed");
    let pool = MemoryPool::new();

    for size in [16, 64, 512, 4096, 65536] {
        group.throughput(Throughput::Elements(OPS));
        group.bench_with_input(BenchmarkId::new("spanpool", size), &size, |b, &size| {
            b.iter(|| pool_alloc_free(&pool, size));
        });
        group.bench_with_input(BenchmarkId::new("libc", size), &size, |b, &size| {
            b.iter(|| libc_alloc_free(size));
        });
    }
    group.finish();
}

fn bench_mixed_sizes(c: &mut Criterion) {
    let sizes = [24, 96, 700, 3000, 10_000, 100_000];
    let mut group = c.benchmark_group("alloc_free_mixed");
    group.throughput(Throughput::Elements(OPS * sizes.len() as u64));

    let pool = MemoryPool::new();
    group.bench_function("spanpool", |b| {
        b.iter(|| {
            for &size in &sizes {
                pool_alloc_free(&pool, size);
            }
        });
    });
    group.bench_function("libc", |b| {
        b.iter(|| {
            for &size in &sizes {
                libc_alloc_free(size);
            }
        });
    });
    group.finish();
}

fn bench_large_objects(c: &mut Criterion) {
    let size = MAX_BYTES + 1;
    let mut group = c.benchmark_group("alloc_free_large");
    group.throughput(Throughput::Elements(OPS));

    let pool = MemoryPool::new();
    group.bench_function("spanpool", |b| b.iter(|| pool_alloc_free(&pool, size)));
    group.bench_function("libc", |b| b.iter(|| libc_alloc_free(size)));
    group.finish();
}

fn bench_threaded_churn(c: &mut Criterion) {
    const THREADS: usize = 4;
    const PER_THREAD_OPS: usize = 2_000;
    let sizes = [32, 256, 2048, 16_384];

    let mut group = c.benchmark_group("threaded_churn");
    group.throughput(Throughput::Elements((THREADS * PER_THREAD_OPS) as u64));

    let pool = MemoryPool::new();
    group.bench_function("spanpool", |b| {
        b.iter(|| {
            thread::scope(|scope| {
                for t in 0..THREADS {
                    let pool = &pool;
                    scope.spawn(move || {
                        for i in 0..PER_THREAD_OPS {
                            let size = sizes[(i + t) % sizes.len()];
                            let p = pool.allocate(size);
                            black_box(p);
                            pool.deallocate(p, size);
                        }
                    });
                }
            });
        });
    });
    group.bench_function("libc", |b| {
        b.iter(|| {
            thread::scope(|scope| {
                for t in 0..THREADS {
                    scope.spawn(move || {
                        for i in 0..PER_THREAD_OPS {
                            let size = sizes[(i + t) % sizes.len()];
                            // SAFETY: malloc/free pair local to the loop.
                            unsafe {
                                let p = libc::malloc(size);
                                black_box(p);
                                libc::free(p);
                            }
                        }
                    });
                }
            });
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_fixed_sizes,
    bench_mixed_sizes,
    bench_large_objects,
    bench_threaded_churn
);
criterion_main!(benches);
