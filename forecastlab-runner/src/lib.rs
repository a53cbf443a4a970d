//! ForecastLab Runner: pipeline orchestration over `forecastlab-core`.
//!
//! This crate provides:
//! - TOML/builder pipeline configuration with the compressor and pump presets
//! - The per-identifier pipeline (fetch, clean, forecast, persist, backtest)
//!   with failure isolation, bounded retry and optional rayon parallelism
//! - Run reports and on-disk artifacts (manifest, CSV, yhat JSON, Markdown)
//! - Deterministic synthetic sensor data for offline runs

pub mod artifacts;
pub mod config;
pub mod persist;
pub mod pipeline;
pub mod presets;
pub mod report;
pub mod retry;
pub mod synthetic;

pub use artifacts::ArtifactManager;
pub use config::{
    BacktestSection, ConfigError, ForecastSection, ParallelismConfig, PipelineConfig,
    PipelineConfigBuilder, RunId, WindowConfig,
};
pub use pipeline::{
    ErrorKind, LogProgress, Pipeline, PipelineError, PipelineProgress, RunError, Stage,
};
pub use report::{IdentifierOutcome, OutcomeStatus, PipelineReport};
pub use retry::{RetryError, RetryPolicy};
pub use synthetic::{generate_sensor_series, SensorProfile};
