//! Serializable pipeline configuration.
//!
//! A `PipelineConfig` captures everything needed to reproduce a run: which
//! identifiers, which data set, the history window, forecast and cap policy,
//! the optional backtest, and retry/timeout/parallelism settings. It loads
//! from TOML, builds fluently, and hashes to a deterministic run id.

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use forecastlab_core::backtest::{BacktestOptions, GapFill, PERCENTAGE_DECIMALS, ZERO_TRUTH_EPSILON};
use forecastlab_core::forecast::{interval_z_score, CapRule, ForecastParams, SeasonalityMode};
use forecastlab_core::series::{Aggregation, Granularity};
use forecastlab_core::store::{DataSetRef, HttpStoreConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Unique identifier for a pipeline run (content-addressable hash).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("unknown preset '{0}' (expected one of: compressor, pump)")]
    UnknownPreset(String),
}

/// History window `[start, start + days)`, starting at midnight UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub start: NaiveDate,
    pub days: u32,
}

impl WindowConfig {
    pub fn new(start: NaiveDate, days: u32) -> Self {
        Self { start, days }
    }

    pub fn start_time(&self) -> NaiveDateTime {
        self.start.and_time(chrono::NaiveTime::MIN)
    }

    pub fn end_time(&self) -> NaiveDateTime {
        self.start_time() + chrono::Duration::days(i64::from(self.days))
    }
}

/// Forecast settings. Granularity and cap live at the top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSection {
    pub changepoint_sensitivity: f64,
    pub horizon_steps: usize,
    pub interval_width: f64,
    pub n_changepoints: usize,
    pub changepoint_range: f64,
    pub seasonality: SeasonalityMode,
}

impl Default for ForecastSection {
    fn default() -> Self {
        let p = ForecastParams::default();
        Self {
            changepoint_sensitivity: p.changepoint_sensitivity,
            horizon_steps: p.horizon_steps,
            interval_width: p.interval_width,
            n_changepoints: p.n_changepoints,
            changepoint_range: p.changepoint_range,
            seasonality: p.seasonality,
        }
    }
}

/// Optional backtest after the forecast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSection {
    /// Test window is `[history_end, history_end + lookahead_days)`.
    pub lookahead_days: u32,
    pub gap_fill: GapFill,
    pub require_full_coverage: bool,
}

impl Default for BacktestSection {
    fn default() -> Self {
        Self {
            lookahead_days: 7,
            gap_fill: GapFill::ForwardBackward,
            require_full_coverage: false,
        }
    }
}

impl BacktestSection {
    pub fn to_options(&self) -> BacktestOptions {
        BacktestOptions {
            gap_fill: self.gap_fill,
            require_full_coverage: self.require_full_coverage,
            zero_epsilon: ZERO_TRUTH_EPSILON,
            decimals: PERCENTAGE_DECIMALS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelismConfig {
    pub enabled: bool,
    pub max_threads: usize,
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_threads: 4,
        }
    }
}

/// Complete configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub identifiers: Vec<String>,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub granularity: Granularity,
    #[serde(default)]
    pub treat_zero_as_missing: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    pub data_set: DataSetRef,
    pub window: WindowConfig,
    #[serde(default)]
    pub forecast: ForecastSection,
    #[serde(default)]
    pub cap: CapRule,
    #[serde(default)]
    pub backtest: Option<BacktestSection>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub parallelism: ParallelismConfig,
}

impl PipelineConfig {
    pub fn builder(name: impl Into<String>) -> PipelineConfigBuilder {
        PipelineConfigBuilder::new(name)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("failed to load config {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Computes a deterministic hash id for this configuration.
    ///
    /// Parallelism settings are excluded: they never change results.
    pub fn run_id(&self) -> RunId {
        let canonical = Self {
            parallelism: ParallelismConfig::default(),
            ..self.clone()
        };
        let bytes = serde_json::to_vec(&canonical)
            .unwrap_or_else(|_| format!("{canonical:?}").into_bytes());
        blake3::hash(&bytes).to_hex().to_string()
    }

    pub fn history_start(&self) -> NaiveDateTime {
        self.window.start_time()
    }

    pub fn history_end(&self) -> NaiveDateTime {
        self.window.end_time()
    }

    /// `[history_end, history_end + lookahead)` when a backtest is configured.
    pub fn test_window(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        self.backtest.map(|b| {
            let start = self.history_end();
            (start, start + chrono::Duration::days(i64::from(b.lookahead_days)))
        })
    }

    pub fn forecast_params(&self) -> ForecastParams {
        ForecastParams {
            changepoint_sensitivity: self.forecast.changepoint_sensitivity,
            horizon_steps: self.forecast.horizon_steps,
            granularity: self.granularity,
            cap_rule: self.cap,
            interval_width: self.forecast.interval_width,
            n_changepoints: self.forecast.n_changepoints,
            changepoint_range: self.forecast.changepoint_range,
            seasonality: self.forecast.seasonality.clone(),
        }
    }

    /// Adapt a remote store config to this pipeline: the pipeline's
    /// [`RetryPolicy`] is the only retry layer, and no single request may
    /// outlast the per-identifier timeout.
    pub fn http_store_config(&self, base: HttpStoreConfig) -> HttpStoreConfig {
        let cfg = base.without_retries();
        match self.timeout_secs {
            Some(secs) => cfg.with_timeout_at_most(secs),
            None => cfg,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.identifiers.is_empty() {
            return invalid("identifiers must not be empty".into());
        }
        let mut seen = HashSet::new();
        for id in &self.identifiers {
            if id.trim().is_empty() {
                return invalid("identifiers must not be blank".into());
            }
            if !seen.insert(id.as_str()) {
                return invalid(format!("duplicate identifier '{id}'"));
            }
        }
        if let DataSetRef::ExternalId(xid) = &self.data_set {
            if xid.trim().is_empty() {
                return invalid("data set external id must not be blank".into());
            }
        }
        if self.window.days == 0 {
            return invalid("window.days must be at least 1".into());
        }
        if self.forecast.horizon_steps == 0 {
            return invalid("forecast.horizon_steps must be at least 1".into());
        }
        if i32::try_from(self.forecast.horizon_steps).is_err() {
            return invalid(format!(
                "forecast.horizon_steps {} is out of range",
                self.forecast.horizon_steps
            ));
        }
        let s = self.forecast.changepoint_sensitivity;
        if !s.is_finite() || s <= 0.0 {
            return invalid(format!("forecast.changepoint_sensitivity must be positive, got {s}"));
        }
        if interval_z_score(self.forecast.interval_width).is_none() {
            return invalid(format!(
                "forecast.interval_width {} is not one of 0.5, 0.8, 0.9, 0.95, 0.99",
                self.forecast.interval_width
            ));
        }
        let r = self.forecast.changepoint_range;
        if !(r > 0.0 && r <= 1.0) {
            return invalid(format!("forecast.changepoint_range must be in (0, 1], got {r}"));
        }
        let m = self.cap.multiplier;
        if !m.is_finite() || m <= 0.0 {
            return invalid(format!("cap.multiplier must be positive, got {m}"));
        }
        if let Some(b) = &self.backtest {
            if b.lookahead_days == 0 {
                return invalid("backtest.lookahead_days must be at least 1".into());
            }
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".into());
        }
        if self.timeout_secs == Some(0) {
            return invalid("timeout_secs must be positive when set".into());
        }
        if self.parallelism.max_threads == 0 {
            return invalid("parallelism.max_threads must be at least 1".into());
        }
        Ok(())
    }
}

/// Fluent builder. `build()` validates.
#[derive(Debug, Clone)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            config: PipelineConfig {
                name: name.into(),
                identifiers: Vec::new(),
                data_set: DataSetRef::Id(0),
                window: WindowConfig::new(NaiveDate::default(), 30),
                aggregation: Aggregation::default(),
                granularity: Granularity::default(),
                treat_zero_as_missing: false,
                timeout_secs: None,
                forecast: ForecastSection::default(),
                cap: CapRule::default(),
                backtest: None,
                retry: RetryPolicy::default(),
                parallelism: ParallelismConfig::default(),
            },
        }
    }

    pub fn identifier(mut self, id: impl Into<String>) -> Self {
        self.config.identifiers.push(id.into());
        self
    }

    pub fn identifiers<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.identifiers.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn data_set(mut self, data_set: DataSetRef) -> Self {
        self.config.data_set = data_set;
        self
    }

    pub fn window(mut self, start: NaiveDate, days: u32) -> Self {
        self.config.window = WindowConfig::new(start, days);
        self
    }

    pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
        self.config.aggregation = aggregation;
        self
    }

    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.config.granularity = granularity;
        self
    }

    pub fn forecast(mut self, forecast: ForecastSection) -> Self {
        self.config.forecast = forecast;
        self
    }

    pub fn changepoint_sensitivity(mut self, sensitivity: f64) -> Self {
        self.config.forecast.changepoint_sensitivity = sensitivity;
        self
    }

    pub fn horizon_steps(mut self, steps: usize) -> Self {
        self.config.forecast.horizon_steps = steps;
        self
    }

    pub fn cap(mut self, cap: CapRule) -> Self {
        self.config.cap = cap;
        self
    }

    pub fn treat_zero_as_missing(mut self, yes: bool) -> Self {
        self.config.treat_zero_as_missing = yes;
        self
    }

    pub fn backtest(mut self, backtest: BacktestSection) -> Self {
        self.config.backtest = Some(backtest);
        self
    }

    pub fn without_backtest(mut self) -> Self {
        self.config.backtest = None;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = Some(secs);
        self
    }

    pub fn parallelism(mut self, enabled: bool, max_threads: usize) -> Self {
        self.config.parallelism = ParallelismConfig {
            enabled,
            max_threads,
        };
        self
    }

    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// For presets, whose validity is covered by tests.
    pub(crate) fn build_unchecked(self) -> PipelineConfig {
        self.config
    }
}
