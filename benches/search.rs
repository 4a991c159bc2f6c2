use chemdex::{
    FingerprintParams, FragmentChemistry, FragmentQuery, FragmentStructure, Index, IndexBuilder,
    Matcher, SearchOptions,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tempfile::TempDir;

fn random_records(count: usize, seed: u64) -> Vec<FragmentStructure> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let n = rng.gen_range(8..40);
            FragmentStructure::new("C6H6", (0..n).map(|_| rng.gen_range(0..1024u32)))
        })
        .collect()
}

fn populated(dir: &TempDir, count: usize) -> Arc<Index<FragmentChemistry>> {
    let index = IndexBuilder::new(FragmentChemistry)
        .path(dir.path().join("bench"))
        .fingerprint(FingerprintParams::new(8, 4).unwrap())
        .file_sizes(8 << 20, 256 << 20)
        .option_string("small_base_limit:1000;cell_build_size:1000")
        .unwrap()
        .create()
        .unwrap();
    index.insert_batch(&random_records(count, 7)).unwrap();
    index.optimize().unwrap();
    Arc::new(index)
}

fn drain(mut matcher: Matcher<FragmentChemistry>) -> usize {
    let mut hits = 0;
    while matcher.next().unwrap() {
        hits += 1;
    }
    hits
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.sample_size(10);

    for count in [1_000, 10_000] {
        let records = random_records(count, 1);
        group.bench_with_input(BenchmarkId::new("sequential", count), &records, |b, records| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                let index = IndexBuilder::new(FragmentChemistry)
                    .path(dir.path().join("bench"))
                    .file_sizes(8 << 20, 256 << 20)
                    .create()
                    .unwrap();
                for record in records {
                    index.insert(record, None).unwrap();
                }
            });
        });
        group.bench_with_input(BenchmarkId::new("batch", count), &records, |b, records| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                let index = IndexBuilder::new(FragmentChemistry)
                    .path(dir.path().join("bench"))
                    .file_sizes(8 << 20, 256 << 20)
                    .create()
                    .unwrap();
                index.insert_batch(records).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_substructure(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let index = populated(&dir, 20_000);
    let mut group = c.benchmark_group("substructure");

    for fragments in [1usize, 3, 6] {
        let query: Vec<u32> = (0..fragments as u32).map(|i| i * 17).collect();
        group.bench_with_input(BenchmarkId::new("fragments", fragments), &query, |b, query| {
            b.iter(|| {
                let matcher = Matcher::substructure(
                    Arc::clone(&index),
                    FragmentQuery::new(query.iter().copied()),
                    &SearchOptions::default(),
                )
                .unwrap();
                black_box(drain(matcher))
            });
        });
    }
    group.finish();
}

fn bench_similarity(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let index = populated(&dir, 20_000);
    let query = random_records(1, 99).remove(0);
    let mut group = c.benchmark_group("similarity");

    for min in [0.3, 0.5, 0.7, 0.9] {
        group.bench_with_input(BenchmarkId::new("threshold", min), &min, |b, &min| {
            b.iter(|| {
                let matcher = Matcher::similarity(
                    Arc::clone(&index),
                    &query,
                    min,
                    1.0,
                    &SearchOptions::default(),
                )
                .unwrap();
                black_box(drain(matcher))
            });
        });
    }
    for limit in [1usize, 10, 100] {
        group.bench_with_input(BenchmarkId::new("top_n", limit), &limit, |b, &limit| {
            b.iter(|| {
                let matcher = Matcher::top_n(
                    Arc::clone(&index),
                    &query,
                    limit,
                    0.0,
                    &SearchOptions::default(),
                )
                .unwrap();
                black_box(drain(matcher))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_insert, bench_substructure, bench_similarity);
criterion_main!(benches);
