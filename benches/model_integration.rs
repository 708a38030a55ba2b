//! Benchmarks for forward integration of the compartmental model.
//!
//! Integration dominates every objective evaluation, so these numbers bound
//! how fast any back-end can fit a region.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use epiforecast::config::ClinicalRates;
use epiforecast::forecast::ForecastGenerator;
use epiforecast::model::InitialConditions;
use epiforecast::parameters::ModelParams;

fn bench_horizons(c: &mut Criterion) {
    let clinical = ClinicalRates::default();
    let generator = ForecastGenerator::new(clinical);
    let initial = InitialConditions::from_observed(1e7, 500.0, 12.0, &clinical);
    let params = ModelParams::default();

    let mut group = c.benchmark_group("integration_horizon");
    for days in [30usize, 120, 365] {
        group.bench_with_input(BenchmarkId::from_parameter(days), &days, |b, &days| {
            b.iter(|| generator.integrate(black_box(&initial), black_box(&params), days))
        });
    }
    group.finish();
}

fn bench_resurgence(c: &mut Criterion) {
    let clinical = ClinicalRates::default();
    let generator = ForecastGenerator::new(clinical);
    let initial = InitialConditions::from_observed(1e7, 500.0, 12.0, &clinical);

    let mut group = c.benchmark_group("resurgence_jump");
    for jump in [0.0, 1.0, 4.0] {
        let mut params = ModelParams::default();
        params.jump = jump;
        params.t_jump = 60.0;
        group.bench_with_input(BenchmarkId::from_parameter(jump), &params, |b, params| {
            b.iter(|| generator.integrate(black_box(&initial), black_box(params), 180))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_horizons, bench_resurgence);
criterion_main!(benches);
