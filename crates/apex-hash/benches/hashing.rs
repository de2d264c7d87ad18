//! Benchmarks for the path hash set

use apex_hash::{hash_all, hash32, hash48};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

fn bench_hashes(c: &mut Criterion) {
    let mut group = c.benchmark_group("path_hash");

    for size in [16usize, 64, 256, 4096] {
        let data: Vec<u8> = (0..size).map(|i| b'a' + (i % 26) as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("hash32", size), &data, |b, data| {
            b.iter(|| hash32(black_box(data)));
        });
        group.bench_with_input(BenchmarkId::new("hash48", size), &data, |b, data| {
            b.iter(|| hash48(black_box(data)));
        });
        group.bench_with_input(BenchmarkId::new("hash_all", size), &data, |b, data| {
            b.iter(|| hash_all(black_box(data)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_hashes);
criterion_main!(benches);
