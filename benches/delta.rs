use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fota_delta::{Delta, SuffixSorter};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0; len];
    StdRng::seed_from_u64(seed).fill(&mut data[..]);
    data
}

/// A copy of `old` with a few scattered byte edits and a short insertion.
fn edited(old: &[u8], seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut new = old.to_vec();
    for _ in 0..old.len() / 512 {
        let at = rng.random_range(0..new.len());
        new[at] = rng.random();
    }
    let at = rng.random_range(0..new.len());
    new.splice(at..at, random(32, seed + 1));
    new.truncate(old.len());
    new
}

fn bench_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("qsufsort");
    for &size in &[1024, 4096, 65536] {
        let random_block = random(size, 1);
        let zeros = vec![0; size];
        let mut sorter = SuffixSorter::with_capacity(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("random", size), &random_block, |b, old| {
            b.iter(|| sorter.sort(old).len())
        });
        group.bench_with_input(BenchmarkId::new("zeros", size), &zeros, |b, old| {
            b.iter(|| sorter.sort(old).len())
        });
    }
    group.finish();
}

fn bench_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta");
    for &size in &[4096, 65536] {
        let old = random(size, 2);
        let new = edited(&old, 3);
        let unrelated = random(size, 4);
        let mut delta = Delta::with_capacity(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("edited", size), &(&old, &new), |b, (old, new)| {
            b.iter(|| {
                delta.compute(old, new);
                delta.extra().len()
            })
        });
        group.bench_with_input(BenchmarkId::new("unrelated", size), &(&old, &unrelated), |b, (old, new)| {
            b.iter(|| {
                delta.compute(old, new);
                delta.extra().len()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sort, bench_delta);
criterion_main!(benches);
