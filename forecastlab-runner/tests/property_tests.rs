//! Property tests for retry and configuration invariants.
//!
//! Uses proptest to verify:
//! 1. Retry delays never decrease and never exceed the policy maximum
//! 2. Retry call counts: transient failures are retried up to the limit
//! 3. Config TOML round-trip preserves the config and its run id
//! 4. Synthetic series are deterministic and cover `[start, end)`

use std::cell::Cell;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use forecastlab_core::forecast::CapRule;
use forecastlab_core::series::Granularity;
use forecastlab_core::store::{DataSetRef, StoreError};
use forecastlab_runner::{
    generate_sensor_series, BacktestSection, PipelineConfig, RetryError, RetryPolicy,
    SensorProfile,
};
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_policy() -> impl Strategy<Value = RetryPolicy> {
    (1u32..10, 0u64..10_000, 0u64..100_000).prop_map(|(max_attempts, base, max)| RetryPolicy {
        max_attempts,
        base_delay_ms: base,
        max_delay_ms: max,
    })
}

fn arb_config() -> impl Strategy<Value = PipelineConfig> {
    (
        prop::collection::btree_set("[A-Z]{1,6}(_[A-Z0-9]{1,4})?", 1..5),
        0i64..2_000,
        1u32..90,
        1usize..500,
        1u32..400,
        prop::bool::ANY,
        prop::bool::ANY,
    )
        .prop_map(|(ids, day_offset, days, horizon, cap_pct, median, backtest)| {
            let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + Duration::days(day_offset);
            let multiplier = f64::from(cap_pct) / 100.0;
            let cap = if median {
                CapRule::median_times(multiplier)
            } else {
                CapRule::mean_times(multiplier)
            };
            let mut builder = PipelineConfig::builder("prop")
                .identifiers(ids)
                .data_set(DataSetRef::Id(7))
                .window(start, days)
                .horizon_steps(horizon)
                .cap(cap);
            if backtest {
                builder = builder.backtest(BacktestSection::default());
            }
            builder.build().unwrap()
        })
}

fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 2, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

// ── 1. Retry Delays ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn retry_delay_is_monotone_and_bounded(policy in arb_policy(), retry in 1u32..200) {
        let this = policy.delay_for(retry);
        let next = policy.delay_for(retry + 1);
        prop_assert!(next >= this);
        prop_assert!(this.as_millis() <= u128::from(policy.max_delay_ms));
    }
}

// ── 2. Retry Call Counts ─────────────────────────────────────────────

proptest! {
    #[test]
    fn transient_failures_retry_up_to_limit(max_attempts in 1u32..6, failures in 0u32..8) {
        let policy = RetryPolicy {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        };
        let calls = Cell::new(0u32);
        let result = policy.run("prop", None, || {
            calls.set(calls.get() + 1);
            if calls.get() <= failures {
                Err(StoreError::RateLimited { retry_after_secs: 0 })
            } else {
                Ok(calls.get())
            }
        });

        if failures < max_attempts {
            prop_assert_eq!(result.ok(), Some(failures + 1));
        } else {
            let exhausted = matches!(
                result,
                Err(RetryError::Exhausted { attempts, .. }) if attempts == max_attempts
            );
            prop_assert!(exhausted);
        }
        prop_assert_eq!(calls.get(), (failures + 1).min(max_attempts));
    }
}

// ── 3. Config Round-Trip ─────────────────────────────────────────────

proptest! {
    #[test]
    fn config_survives_toml(cfg in arb_config()) {
        let text = cfg.to_toml().unwrap();
        let back = PipelineConfig::from_toml(&text).unwrap();
        prop_assert_eq!(&back, &cfg);
        prop_assert_eq!(back.run_id(), cfg.run_id());
        prop_assert!(back.validate().is_ok());
    }
}

// ── 4. Synthetic Determinism ─────────────────────────────────────────

proptest! {
    #[test]
    fn synthetic_series_is_deterministic(id in "[A-Z]{1,8}", hours in 1u32..96) {
        let start = at(1, 0);
        let end = start + Duration::hours(i64::from(hours));
        let profile = SensorProfile::pump();

        let a = generate_sensor_series(&id, start, end, Granularity::HOURLY, &profile);
        let b = generate_sensor_series(&id, start, end, Granularity::HOURLY, &profile);
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.len(), hours as usize);
        prop_assert_eq!(a[0].0, start);
        prop_assert!(a.iter().all(|(ts, v)| *ts < end && v.is_finite()));
    }
}
