//! Criterion benchmarks for the per-datapoint hot path.
//!
//! Key metrics:
//! - Sorted insert into a trace for in-order and reverse sweeps
//! - Full pipeline delivery (average, correct, commit) per sweep
//! - FFT time-domain transform for common point counts
//!
//! Run with: cargo bench --bench trace_insert

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use num_complex::Complex64;
use rust_vna::config::Settings;
use rust_vna::data::tdr::{FftTdr, TdrProvider};
use rust_vna::data::trace::{Trace, TraceId};
use rust_vna::hardware::MockVna;
use rust_vna::measurement_types::{LiveParameter, Sample};
use rust_vna::vna::Vna;

const POINT_COUNTS: [u32; 3] = [101, 1001, 4501];

/// Insert one sweep worth of samples into an empty trace.
fn trace_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("trace_insert");

    for points in POINT_COUNTS {
        let samples: Vec<Sample> = (0..points)
            .map(|i| Sample::new(1.0e6 + f64::from(i) * 1.0e5, Complex64::new(0.5, -0.1)))
            .collect();
        let reversed: Vec<Sample> = samples.iter().rev().copied().collect();

        group.throughput(Throughput::Elements(u64::from(points)));
        for (name, input) in [("ascending", &samples), ("descending", &reversed)] {
            group.bench_with_input(BenchmarkId::new(name, points), input, |b, input| {
                b.iter(|| {
                    let mut trace = Trace::new(TraceId(1), "S11", [255, 255, 0], LiveParameter::S11);
                    for sample in input {
                        trace.add_sample(black_box(*sample)).unwrap();
                    }
                    trace
                });
            });
        }
    }

    group.finish();
}

/// Deliver a full sweep through the core with four live traces.
fn pipeline_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_sweep");

    for points in POINT_COUNTS {
        let mut settings = Settings::default();
        settings.sweep.points = points;
        settings.sweep.averages = 4;
        let mut vna = Vna::new(&settings);
        let mut mock = MockVna::new(*vna.settings());
        mock.set_noise(0.001);
        let sweep = mock.sweep();

        group.throughput(Throughput::Elements(u64::from(points)));
        group.bench_with_input(BenchmarkId::from_parameter(points), &sweep, |b, sweep| {
            b.iter(|| {
                for dp in sweep {
                    vna.deliver(black_box(*dp));
                }
            });
        });
    }

    group.finish();
}

/// Time-domain transform of a flat reflection.
fn tdr_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("tdr_transform");

    for points in POINT_COUNTS {
        let samples: Vec<Sample> = (0..points)
            .map(|i| Sample::new(1.0e6 * f64::from(i + 1), Complex64::new(-1.0, 0.0)))
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(points), &samples, |b, samples| {
            b.iter(|| FftTdr.compute(black_box(samples)));
        });
    }

    group.finish();
}

criterion_group!(benches, trace_insert, pipeline_sweep, tdr_transform);
criterion_main!(benches);
