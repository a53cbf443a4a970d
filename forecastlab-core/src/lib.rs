//! ForecastLab Core: series types, cleaning, forecasting, backtesting, stores.
//!
//! This crate holds everything the pipeline needs for one identifier:
//! - Series domain types (raw, clean, output roles, granularity)
//! - Data cleaner (zero sentinels, forward/backward fill)
//! - Capacity-bounded logistic forecast engine with Fourier seasonality
//! - Backtest evaluator (inner join, gap fill, error percentages)
//! - `SeriesStore` trait with Parquet, HTTP and in-memory implementations

pub mod backtest;
pub mod clean;
pub mod forecast;
pub mod series;
pub mod store;
