use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use metacal::combine::{MethodKind, combine};
use metacal::config::NumericsConfig;
use metacal::copula::generate;
use metacal::types::PValueMatrix;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn correlated_pvalues(features: usize, tests: usize) -> PValueMatrix {
    let mut rng = StdRng::seed_from_u64(0x5EED_C0DA + features as u64);
    match generate(0.5, features, tests, &mut rng) {
        Ok(pvalues) => pvalues,
        Err(e) => panic!("benchmark input could not be generated: {e}"),
    }
}

fn benchmark_combiners(c: &mut Criterion) {
    let numerics = NumericsConfig::default();
    let inputs: Vec<_> = [2_usize, 8, 32]
        .iter()
        .map(|&tests| (tests, correlated_pvalues(20_000, tests)))
        .collect();

    let mut group = c.benchmark_group("combine");
    for (tests, pvalues) in inputs.iter() {
        group.throughput(Throughput::Elements((pvalues.num_features() * tests) as u64));
        for method in MethodKind::ALL {
            group.bench_with_input(BenchmarkId::new(method.name(), tests), pvalues, |b, input| {
                b.iter(|| {
                    let combined = combine(black_box(input), method, &numerics);
                    black_box(combined).ok();
                });
            });
        }
    }
    group.finish();
}

fn benchmark_copula(c: &mut Criterion) {
    let mut group = c.benchmark_group("copula_generate");
    for tests in [2_usize, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(tests), &tests, |b, &d| {
            let mut rng = StdRng::seed_from_u64(11);
            b.iter(|| black_box(generate(0.25, 10_000, d, &mut rng)).ok());
        });
    }
    group.finish();
}

criterion_group!(combine_benchmark, benchmark_combiners, benchmark_copula);
criterion_main!(combine_benchmark);
