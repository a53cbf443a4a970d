//! End-to-end scenarios across store, cleaner, forecast engine and backtest.
//!
//! Tests:
//! 1. Zero sentinel is forward-filled before fitting
//! 2. Pump-style run: 45 days of hourly history, horizon ends 2022-07-24T00:00
//! 3. Compressor-style run: mean-based cap flows to every row
//! 4. Backtest over half-covered horizon keeps 5 of 10 rows
//! 5. Zero ground truth uses the epsilon denominator

use chrono::{Duration, NaiveDate, NaiveDateTime};
use forecastlab_core::backtest::{evaluate, BacktestOptions};
use forecastlab_core::clean::{clean, clean_with_report};
use forecastlab_core::forecast::{forecast, CapRule, ForecastParams, ForecastRow};
use forecastlab_core::series::{Aggregation, Granularity, RawSeries, SeriesPoint};
use forecastlab_core::store::{InMemoryStore, SeriesStore};

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Hourly pump head: level around 120 with a daily swing and a zero every 50 hours.
fn pump_signal(start: NaiveDateTime, hours: i64) -> Vec<(NaiveDateTime, f64)> {
    (0..hours)
        .map(|h| {
            let v = if h % 50 == 7 {
                0.0
            } else {
                120.0 + 4.0 * (2.0 * std::f64::consts::PI * h as f64 / 24.0).sin()
            };
            (start + Duration::hours(h), v)
        })
        .collect()
}

// ──────────────────────────────────────────────
// 1. Zero sentinel
// ──────────────────────────────────────────────

#[test]
fn zero_sentinel_is_forward_filled() {
    let t0 = at(2022, 6, 2);
    let raw = RawSeries::from_pairs(
        "P",
        vec![
            (t0, 10.0),
            (t0 + Duration::hours(1), 0.0),
            (t0 + Duration::hours(2), 12.0),
        ],
    )
    .unwrap();

    let (cleaned, report) = clean_with_report(&raw, true);
    let values: Vec<f64> = cleaned.values();
    assert_eq!(values, vec![10.0, 10.0, 12.0]);
    assert_eq!(report.zero_sentinels, 1);
    assert_eq!(report.forward_filled, 1);

    let kept = clean(&raw, false);
    assert_eq!(kept.values(), vec![10.0, 0.0, 12.0]);
}

// ──────────────────────────────────────────────
// 2. Pump-style horizon
// ──────────────────────────────────────────────

#[test]
fn pump_history_forecasts_one_week_ahead() {
    let start = at(2022, 6, 2);
    let end = start + Duration::days(45);
    // Last hourly bucket in [start, end) is 2022-07-16T23:00
    let store = InMemoryStore::new().with_series("PUMP", pump_signal(start, 45 * 24));

    let raw = store
        .retrieve_history("PUMP", start, end, Aggregation::Average, Granularity::HOURLY)
        .unwrap();
    assert_eq!(raw.len(), 45 * 24);

    let cleaned = clean(&raw, true);
    let params = ForecastParams::default().with_cap_rule(CapRule::median_times(0.8));
    let fc = forecast(&cleaned, &params).unwrap();

    let horizon = fc.horizon();
    assert_eq!(horizon.len(), 168);
    assert_eq!(horizon[0].timestamp, at(2022, 7, 17));
    assert_eq!(
        horizon[167].timestamp,
        at(2022, 7, 23) + Duration::hours(23)
    );
    // Cap sits below the data, so the trend saturates at it
    assert!(fc.rows().iter().all(|r| r.trend <= fc.cap() + 1e-9));
}

#[test]
fn horizon_ends_seven_days_after_last_point() {
    let start = at(2022, 6, 2);
    // History through 2022-07-17T00:00 inclusive
    let hours = 45 * 24 + 1;
    let raw = RawSeries::from_pairs("PUMP", pump_signal(start, hours)).unwrap();
    let fc = forecast(&clean(&raw, true), &ForecastParams::default()).unwrap();

    assert_eq!(fc.len(), hours as usize + 168);
    assert_eq!(fc.horizon().last().unwrap().timestamp, at(2022, 7, 24));
}

// ──────────────────────────────────────────────
// 3. Compressor-style cap
// ──────────────────────────────────────────────

#[test]
fn compressor_cap_is_mean_times_one_point_one() {
    let start = at(2023, 2, 1);
    let points: Vec<(NaiveDateTime, f64)> = (0..30 * 24)
        .map(|h| (start + Duration::hours(h), 78.0 + (h % 12) as f64 * 0.25))
        .collect();
    let mean = points.iter().map(|(_, v)| v).sum::<f64>() / points.len() as f64;
    let raw = RawSeries::from_pairs("COMP", points).unwrap();

    let fc = forecast(&clean(&raw, false), &ForecastParams::default()).unwrap();
    assert!((fc.cap() - 1.1 * mean).abs() < 1e-9);
    assert!(fc.rows().iter().all(|r| r.cap == fc.cap()));
    assert!(fc.rows().iter().all(|r| r.yhat_lower <= r.yhat && r.yhat <= r.yhat_upper));
}

// ──────────────────────────────────────────────
// 4. Backtest join
// ──────────────────────────────────────────────

#[test]
fn backtest_keeps_only_covered_horizon() {
    let t0 = at(2022, 7, 17);
    let rows: Vec<ForecastRow> = (0..10)
        .map(|h| ForecastRow {
            timestamp: t0 + Duration::hours(h),
            yhat: 100.0,
            yhat_lower: 95.0,
            yhat_upper: 105.0,
            trend: 100.0,
            cap: 110.0,
        })
        .collect();
    let truth = RawSeries::new(
        "PUMP",
        (0..5)
            .map(|h| SeriesPoint::observed(t0 + Duration::hours(h), 80.0))
            .collect(),
    )
    .unwrap();

    let outcome = evaluate(&rows, &truth, &BacktestOptions::default()).unwrap();
    assert_eq!(outcome.records.len(), 5);
    assert_eq!(outcome.unmatched_forecast, 5);
    for r in &outcome.records {
        assert_eq!(r.signed_error, 20.0);
        assert_eq!(r.absolute_error_percentage, 25.0);
    }
    let summary = outcome.summary();
    assert_eq!(summary.mean_absolute_error, 20.0);
}

// ──────────────────────────────────────────────
// 5. Zero ground truth
// ──────────────────────────────────────────────

#[test]
fn zero_truth_uses_epsilon() {
    let t0 = at(2022, 7, 17);
    let rows = vec![ForecastRow {
        timestamp: t0,
        yhat: 1.0,
        yhat_lower: 0.0,
        yhat_upper: 2.0,
        trend: 1.0,
        cap: 2.0,
    }];
    let truth = RawSeries::from_pairs("PUMP", vec![(t0, 0.0)]).unwrap();
    let outcome = evaluate(&rows, &truth, &BacktestOptions::default()).unwrap();
    assert_eq!(outcome.records[0].absolute_error_percentage, 100000.0);
}
