//! Criterion benchmarks for catalog construction.
//!
//! Run with:
//!   cargo bench
//!   cargo bench --features parallel
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use catmatch::catalog::CatalogBuilder;
use catmatch::matrix::DistanceMatrix;
use catmatch::prng::Prng;

/// Two noisy clusters in `dims` dimensions, first half then second half.
fn make_coordinates(n: usize, dims: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = Prng::new(seed);
    (0..n)
        .map(|i| {
            let centre = if i < n / 2 { 0.0 } else { 4.0 };
            (0..dims)
                .map(|_| centre + rng.gen_range_f64(-1.0, 1.0))
                .collect()
        })
        .collect()
}

fn bench_distance_matrix(c: &mut Criterion) {
    let mut group = c.benchmark_group("distance_matrix");

    for n in [100, 250, 500, 1000].iter() {
        let coords = make_coordinates(*n, 16, 42);
        group.throughput(Throughput::Elements((*n * *n) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &coords, |b, coords| {
            b.iter(|| black_box(DistanceMatrix::from_coordinates(coords)))
        });
    }

    group.finish();
}

fn bench_catalog_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalog_build");

    for n in [100, 250, 500, 1000].iter() {
        let coords = make_coordinates(*n, 16, 7);
        let Ok(matrix) = DistanceMatrix::from_coordinates(&coords) else {
            continue;
        };
        let builder = CatalogBuilder::new(2, 5);
        group.throughput(Throughput::Elements(*n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &matrix, |b, m| {
            b.iter(|| black_box(builder.build(m)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_distance_matrix, bench_catalog_build);
criterion_main!(benches);
