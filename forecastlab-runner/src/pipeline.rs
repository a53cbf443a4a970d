//! Pipeline orchestrator.
//!
//! Each identifier moves through
//! `FetchingHistory → Cleaning → Forecasting → PersistingForecast` and, when a
//! backtest is configured, `FetchingFuture → Evaluating → PersistingBacktest`.
//!
//! A failure in any stage ends that identifier only. It is logged with the
//! identifier, recorded in the report, and the run moves on. `run()` itself
//! fails only on run-level problems (invalid config, unresolvable data set,
//! thread pool).

use std::fmt;
use std::time::{Duration, Instant};

use chrono::Utc;
use forecastlab_core::backtest::{evaluate, BacktestError};
use forecastlab_core::clean::clean_with_report;
use forecastlab_core::forecast::{forecast, ForecastError, ForecastSeries};
use forecastlab_core::series::{CleanSeries, OutputRole, RawSeries};
use forecastlab_core::store::{SeriesStore, StoreError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, PipelineConfig};
use crate::persist::{backtest_role_points, forecast_role_points, OutputWriter};
use crate::report::{IdentifierOutcome, OutcomeStatus, PipelineReport};
use crate::retry::RetryError;

// ── Stages and errors ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FetchingHistory,
    Cleaning,
    Forecasting,
    PersistingForecast,
    FetchingFuture,
    Evaluating,
    PersistingBacktest,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::FetchingHistory => "fetching_history",
            Stage::Cleaning => "cleaning",
            Stage::Forecasting => "forecasting",
            Stage::PersistingForecast => "persisting_forecast",
            Stage::FetchingFuture => "fetching_future",
            Stage::Evaluating => "evaluating",
            Stage::PersistingBacktest => "persisting_backtest",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a per-identifier failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Retrieval,
    InsufficientData,
    Alignment,
    Persistence,
    Model,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Retrieval => "retrieval",
            ErrorKind::InsufficientData => "insufficient_data",
            ErrorKind::Alignment => "alignment",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Model => "model",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one identifier failed.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("retrieval failed while {stage}: {source}")]
    Retrieval { stage: Stage, source: StoreError },

    #[error("insufficient data: {found} valid point(s), need at least {required}")]
    InsufficientData { found: usize, required: usize },

    #[error("backtest alignment failed: {0}")]
    Alignment(#[from] BacktestError),

    #[error("failed to persist {identifier} ({} role(s) already written): {source}", written.len())]
    Persistence {
        identifier: String,
        written: Vec<OutputRole>,
        source: StoreError,
    },

    #[error("model error: {0}")]
    Model(ForecastError),

    #[error("timed out while {stage}")]
    TimedOut { stage: Stage },
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::Retrieval { .. } => ErrorKind::Retrieval,
            RunError::InsufficientData { .. } => ErrorKind::InsufficientData,
            RunError::Alignment(_) => ErrorKind::Alignment,
            RunError::Persistence { .. } => ErrorKind::Persistence,
            RunError::Model(_) => ErrorKind::Model,
            RunError::TimedOut { .. } => ErrorKind::Timeout,
        }
    }
}

impl From<ForecastError> for RunError {
    fn from(e: ForecastError) -> Self {
        match e {
            ForecastError::InsufficientData { found, required } => {
                RunError::InsufficientData { found, required }
            }
            other => RunError::Model(other),
        }
    }
}

/// Run-level failures. Per-identifier failures never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not resolve data set {data_set}: {source}")]
    DataSet { data_set: String, source: StoreError },

    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}

// ── Progress ────────────────────────────────────────────────────────

/// Callbacks for long-running batches.
pub trait PipelineProgress: Send + Sync {
    fn on_start(&self, identifier: &str, index: usize, total: usize);

    fn on_stage(&self, identifier: &str, stage: Stage);

    fn on_complete(&self, outcome: &IdentifierOutcome, index: usize, total: usize);

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that emits `tracing` events.
pub struct LogProgress;

impl PipelineProgress for LogProgress {
    fn on_start(&self, identifier: &str, index: usize, total: usize) {
        info!(identifier, "[{}/{}] processing", index + 1, total);
    }

    fn on_stage(&self, identifier: &str, stage: Stage) {
        debug!(identifier, %stage, "stage");
    }

    fn on_complete(&self, outcome: &IdentifierOutcome, _index: usize, _total: usize) {
        if outcome.is_success() {
            info!(
                identifier = %outcome.identifier,
                roles = outcome.roles_written.len(),
                duration_ms = outcome.duration_ms,
                "done"
            );
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        info!(succeeded, failed, total, "pipeline complete");
    }
}

// ── Pipeline ────────────────────────────────────────────────────────

pub struct Pipeline {
    config: PipelineConfig,
    progress: Box<dyn PipelineProgress>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            progress: Box::new(LogProgress),
        }
    }

    /// Process identifiers concurrently on a bounded rayon pool.
    pub fn with_parallelism(mut self, enabled: bool) -> Self {
        self.config.parallelism.enabled = enabled;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn PipelineProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every configured identifier against `store`.
    pub fn run(&self, store: &dyn SeriesStore) -> Result<PipelineReport, PipelineError> {
        self.config.validate()?;
        let started_at = Utc::now();
        let run_id = self.config.run_id();

        let data_set_id = self
            .config
            .retry
            .run("resolve data set", None, || {
                store.resolve_data_set(&self.config.data_set)
            })
            .map_err(|e| PipelineError::DataSet {
                data_set: self.config.data_set.to_string(),
                source: e.into_store_error(),
            })?;

        let total = self.config.identifiers.len();
        info!(
            run_id = %run_id,
            name = %self.config.name,
            store = store.name(),
            data_set_id,
            identifiers = total,
            "starting pipeline"
        );

        let outcomes: Vec<IdentifierOutcome> = if self.config.parallelism.enabled {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.parallelism.max_threads)
                .build()
                .map_err(|e| PipelineError::ThreadPool(e.to_string()))?;
            pool.install(|| {
                self.config
                    .identifiers
                    .par_iter()
                    .enumerate()
                    .map(|(i, id)| self.run_identifier(store, data_set_id, id, i, total))
                    .collect()
            })
        } else {
            self.config
                .identifiers
                .iter()
                .enumerate()
                .map(|(i, id)| self.run_identifier(store, data_set_id, id, i, total))
                .collect()
        };

        let report = PipelineReport {
            run_id,
            name: self.config.name.clone(),
            data_set_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        self.progress
            .on_batch_complete(report.succeeded(), report.failed(), total);
        Ok(report)
    }

    fn run_identifier(
        &self,
        store: &dyn SeriesStore,
        data_set_id: u64,
        identifier: &str,
        index: usize,
        total: usize,
    ) -> IdentifierOutcome {
        self.progress.on_start(identifier, index, total);
        let started = Instant::now();

        let mut run = IdentifierRun {
            pipeline: self,
            store,
            data_set_id,
            identifier,
            deadline: self
                .config
                .timeout_secs
                .map(|secs| started + Duration::from_secs(secs)),
            stage: Stage::FetchingHistory,
            outcome: IdentifierOutcome::pending(identifier),
        };

        if let Err(e) = run.execute() {
            warn!(
                identifier,
                stage = %run.stage,
                kind = %e.kind(),
                error = %e,
                "identifier failed, skipping"
            );
            run.outcome.status = OutcomeStatus::Failed {
                stage: run.stage,
                kind: e.kind(),
                message: e.to_string(),
            };
        }

        let mut outcome = run.outcome;
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        self.progress.on_complete(&outcome, index, total);
        outcome
    }
}

/// State for one identifier's pass through the stages.
struct IdentifierRun<'a> {
    pipeline: &'a Pipeline,
    store: &'a dyn SeriesStore,
    data_set_id: u64,
    identifier: &'a str,
    deadline: Option<Instant>,
    stage: Stage,
    outcome: IdentifierOutcome,
}

impl IdentifierRun<'_> {
    fn config(&self) -> &PipelineConfig {
        &self.pipeline.config
    }

    fn enter(&mut self, stage: Stage) -> Result<(), RunError> {
        self.stage = stage;
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(RunError::TimedOut { stage });
        }
        self.pipeline.progress.on_stage(self.identifier, stage);
        Ok(())
    }

    fn writer(&self) -> OutputWriter<'_> {
        OutputWriter {
            store: self.store,
            retry: &self.pipeline.config.retry,
            deadline: self.deadline,
            identifier: self.identifier,
            data_set_id: self.data_set_id,
        }
    }

    fn fetch(
        &self,
        start: chrono::NaiveDateTime,
        end: chrono::NaiveDateTime,
    ) -> Result<RawSeries, RunError> {
        let stage = self.stage;
        if !self.store.is_available() {
            return Err(RunError::Retrieval {
                stage,
                source: StoreError::CircuitBreakerTripped,
            });
        }
        let cfg = self.config();
        self.pipeline
            .config
            .retry
            .run("retrieve history", self.deadline, || {
                self.store.retrieve_history(
                    self.identifier,
                    start,
                    end,
                    cfg.aggregation,
                    cfg.granularity,
                )
            })
            .map_err(|e| match e {
                RetryError::DeadlineExceeded { .. } => RunError::TimedOut { stage },
                RetryError::Exhausted { source, .. } => RunError::Retrieval { stage, source },
            })
    }

    fn execute(&mut self) -> Result<(), RunError> {
        let id = self.identifier;

        self.enter(Stage::FetchingHistory)?;
        let raw = self.fetch(self.config().history_start(), self.config().history_end())?;
        debug!(identifier = id, points = raw.len(), observed = raw.observed_count(), "retrieved history");

        self.enter(Stage::Cleaning)?;
        let (cleaned, report) = clean_with_report(&raw, self.config().treat_zero_as_missing);
        info!(
            identifier = id,
            points = report.total,
            missing = report.originally_missing,
            zero_sentinels = report.zero_sentinels,
            forward_filled = report.forward_filled,
            backward_filled = report.backward_filled,
            "cleaned history"
        );
        self.outcome.clean = Some(report);

        self.enter(Stage::Forecasting)?;
        let fc = forecast(&cleaned, &self.config().forecast_params())?;
        info!(
            identifier = id,
            cap = fc.cap(),
            changepoints = fc.fit().changepoints,
            horizon = fc.horizon().len(),
            "fitted forecast"
        );
        self.outcome.fit = Some(fc.fit().clone());

        self.enter(Stage::PersistingForecast)?;
        self.persist_forecast(&cleaned, &fc)?;
        // Kept even if the backtest fails; the forecast outputs are already written.
        self.outcome.forecast = Some(fc.clone());

        if let Some((test_start, test_end)) = self.config().test_window() {
            self.backtest(&fc, test_start, test_end)?;
        }
        Ok(())
    }

    fn persist_forecast(&mut self, cleaned: &CleanSeries, fc: &ForecastSeries) -> Result<(), RunError> {
        let mut written = std::mem::take(&mut self.outcome.roles_written);
        let result = OutputRole::FORECAST.iter().try_for_each(|&role| {
            let points = forecast_role_points(role, cleaned, fc);
            self.writer().write(self.stage, role, &points, &mut written)
        });
        self.outcome.roles_written = written;
        result
    }

    fn backtest(
        &mut self,
        fc: &ForecastSeries,
        test_start: chrono::NaiveDateTime,
        test_end: chrono::NaiveDateTime,
    ) -> Result<(), RunError> {
        let id = self.identifier;
        let Some(section) = self.config().backtest else {
            return Ok(());
        };

        self.enter(Stage::FetchingFuture)?;
        let truth = self.fetch(test_start, test_end)?;

        self.enter(Stage::Evaluating)?;
        let evaluated = evaluate(fc.horizon(), &truth, &section.to_options())?;
        if evaluated.unmatched_forecast > 0 || evaluated.unmatched_truth > 0 {
            info!(
                identifier = id,
                unmatched_forecast = evaluated.unmatched_forecast,
                unmatched_truth = evaluated.unmatched_truth,
                dropped_gaps = evaluated.dropped_gaps,
                "backtest dropped unmatched timestamps"
            );
        }
        let summary = evaluated.summary();
        info!(
            identifier = id,
            records = summary.records,
            mae = summary.mean_absolute_error,
            mape = summary.mean_absolute_percentage_error,
            "evaluated backtest"
        );
        self.outcome.backtest = Some(summary);
        self.outcome.unmatched_forecast = evaluated.unmatched_forecast;
        self.outcome.unmatched_truth = evaluated.unmatched_truth;

        self.enter(Stage::PersistingBacktest)?;
        let mut written = std::mem::take(&mut self.outcome.roles_written);
        let result = OutputRole::BACKTEST.iter().try_for_each(|&role| {
            let points = backtest_role_points(role, &evaluated);
            self.writer().write(self.stage, role, &points, &mut written)
        });
        self.outcome.roles_written = written;
        self.outcome.backtest_records = evaluated.records;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use forecastlab_core::store::{DataSetRef, InMemoryStore};

    use crate::config::BacktestSection;
    use crate::retry::RetryPolicy;

    fn at(y: i32, m: u32, d: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn hourly(start: chrono::NaiveDateTime, hours: i64, level: f64) -> Vec<(chrono::NaiveDateTime, f64)> {
        (0..hours)
            .map(|h| (start + chrono::Duration::hours(h), level + (h % 24) as f64 * 0.1))
            .collect()
    }

    fn config(ids: &[&str]) -> PipelineConfig {
        PipelineConfig::builder("unit")
            .identifiers(ids.iter().copied())
            .data_set(DataSetRef::ExternalId("ds".into()))
            .window(NaiveDate::from_ymd_opt(2023, 2, 1).unwrap(), 5)
            .horizon_steps(12)
            .retry(RetryPolicy::none())
            .build()
            .unwrap()
    }

    #[test]
    fn forecast_error_classification() {
        let e: RunError = ForecastError::InsufficientData {
            found: 1,
            required: 2,
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::InsufficientData);
        let e: RunError = ForecastError::Singular.into();
        assert_eq!(e.kind(), ErrorKind::Model);
    }

    #[test]
    fn unknown_data_set_fails_the_run() {
        let store = InMemoryStore::new();
        let err = Pipeline::new(config(&["A"])).run(&store).unwrap_err();
        assert!(matches!(err, PipelineError::DataSet { .. }));
    }

    #[test]
    fn unknown_identifier_is_isolated() {
        let store = InMemoryStore::new()
            .with_data_set("ds", 7)
            .with_series("B", hourly(at(2023, 2, 1), 5 * 24, 40.0));
        let report = Pipeline::new(config(&["A", "B"])).run(&store).unwrap();

        assert_eq!(report.data_set_id, 7);
        let a = report.outcome("A").unwrap();
        assert_eq!(a.error_kind(), Some(ErrorKind::Retrieval));
        assert!(a.roles_written.is_empty());
        let b = report.outcome("B").unwrap();
        assert!(b.is_success());
        assert_eq!(b.roles_written, OutputRole::FORECAST.to_vec());
        assert_eq!(store.points(&OutputRole::ForecastTrend.output_identifier("B")).unwrap().len(), 5 * 24 + 12);
    }

    #[test]
    fn empty_history_is_insufficient_data() {
        let store = InMemoryStore::new()
            .with_data_set("ds", 7)
            .with_series("A", Vec::<(chrono::NaiveDateTime, f64)>::new());
        let report = Pipeline::new(config(&["A"])).run(&store).unwrap();
        let a = report.outcome("A").unwrap();
        assert_eq!(a.error_kind(), Some(ErrorKind::InsufficientData));
        assert!(matches!(
            a.status,
            OutcomeStatus::Failed {
                stage: Stage::Forecasting,
                ..
            }
        ));
    }

    #[test]
    fn missing_future_is_alignment_failure() {
        let mut cfg = config(&["A"]);
        cfg.backtest = Some(BacktestSection::default());
        let store = InMemoryStore::new()
            .with_data_set("ds", 7)
            .with_series("A", hourly(at(2023, 2, 1), 5 * 24, 40.0));
        let report = Pipeline::new(cfg).run(&store).unwrap();
        let a = report.outcome("A").unwrap();
        assert_eq!(a.error_kind(), Some(ErrorKind::Alignment));
        // Forecast outputs were already persisted before the backtest failed
        assert_eq!(a.roles_written, OutputRole::FORECAST.to_vec());
        assert_eq!(a.forecast.as_ref().unwrap().horizon().len(), 12);
    }

    #[test]
    fn zero_timeout_is_rejected_by_validation() {
        let mut cfg = config(&["A"]);
        cfg.timeout_secs = Some(0);
        let store = InMemoryStore::new().with_data_set("ds", 7);
        assert!(matches!(
            Pipeline::new(cfg).run(&store),
            Err(PipelineError::Config(_))
        ));
    }
}
