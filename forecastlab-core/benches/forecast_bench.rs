//! Criterion benchmarks for the forecast hot paths.
//!
//! Benchmarks:
//! 1. Clean (zero sentinel + forward/backward fill) over hourly histories
//! 2. Forecast fit + predict for 30- and 45-day hourly histories
//! 3. Backtest evaluation over a one-week horizon

use chrono::{Duration, NaiveDate, NaiveDateTime};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use forecastlab_core::backtest::{evaluate, BacktestOptions};
use forecastlab_core::clean::clean;
use forecastlab_core::forecast::{forecast, ForecastParams};
use forecastlab_core::series::{RawSeries, SeriesPoint};

// ── Helpers ──────────────────────────────────────────────────────────

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2022, 6, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn make_raw(hours: usize) -> RawSeries {
    let points = (0..hours)
        .map(|h| {
            let value = if h % 97 == 0 {
                Some(0.0)
            } else if h % 61 == 0 {
                None
            } else {
                Some(100.0 + (h as f64 * 0.26).sin() * 5.0 + h as f64 * 0.001)
            };
            SeriesPoint::new(start() + Duration::hours(h as i64), value)
        })
        .collect();
    RawSeries::new("BENCH", points).unwrap()
}

// ── 1. Clean ─────────────────────────────────────────────────────────

fn bench_clean(c: &mut Criterion) {
    let mut group = c.benchmark_group("clean");
    for days in [30usize, 45, 365] {
        let raw = make_raw(days * 24);
        group.bench_with_input(BenchmarkId::from_parameter(days), &raw, |b, raw| {
            b.iter(|| clean(black_box(raw), true))
        });
    }
    group.finish();
}

// ── 2. Forecast ──────────────────────────────────────────────────────

fn bench_forecast(c: &mut Criterion) {
    let mut group = c.benchmark_group("forecast");
    group.sample_size(20);
    let params = ForecastParams::default();
    for days in [30usize, 45] {
        let cleaned = clean(&make_raw(days * 24), true);
        group.bench_with_input(BenchmarkId::from_parameter(days), &cleaned, |b, cleaned| {
            b.iter(|| forecast(black_box(cleaned), &params).unwrap())
        });
    }
    group.finish();
}

// ── 3. Backtest ──────────────────────────────────────────────────────

fn bench_backtest(c: &mut Criterion) {
    let history = make_raw(45 * 24);
    let fc = forecast(&clean(&history, true), &ForecastParams::default()).unwrap();
    let horizon_start = start() + Duration::days(45);
    let truth = RawSeries::from_pairs(
        "BENCH",
        (0..7 * 24).map(|h| (horizon_start + Duration::hours(h), 101.0)),
    )
    .unwrap();
    let opts = BacktestOptions::default();

    c.bench_function("backtest_week", |b| {
        b.iter(|| evaluate(black_box(fc.horizon()), black_box(&truth), &opts).unwrap())
    });
}

criterion_group!(benches, bench_clean, bench_forecast, bench_backtest);
criterion_main!(benches);
