//! Per-run and per-identifier outcomes.

use chrono::{DateTime, Utc};
use forecastlab_core::backtest::{BacktestRecord, BacktestSummary};
use forecastlab_core::clean::CleanReport;
use forecastlab_core::forecast::{FitSummary, ForecastSeries};
use forecastlab_core::series::OutputRole;
use serde::{Deserialize, Serialize};

use crate::config::RunId;
use crate::pipeline::{ErrorKind, Stage};

/// How one identifier ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed {
        stage: Stage,
        kind: ErrorKind,
        message: String,
    },
}

/// Everything known about one identifier after a run.
///
/// The bulk series (`forecast`, `backtest_records`) are kept in memory for
/// artifact export and are not part of the serialized manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierOutcome {
    pub identifier: String,
    pub status: OutcomeStatus,
    /// Output roles persisted, in write order. Non-empty on a failure means
    /// partial state was left in the store.
    pub roles_written: Vec<OutputRole>,
    pub clean: Option<CleanReport>,
    pub fit: Option<FitSummary>,
    pub backtest: Option<BacktestSummary>,
    pub unmatched_forecast: usize,
    pub unmatched_truth: usize,
    pub duration_ms: u64,
    #[serde(skip)]
    pub forecast: Option<ForecastSeries>,
    #[serde(skip)]
    pub backtest_records: Vec<BacktestRecord>,
}

impl IdentifierOutcome {
    pub(crate) fn pending(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            status: OutcomeStatus::Succeeded,
            roles_written: Vec::new(),
            clean: None,
            fit: None,
            backtest: None,
            unmatched_forecast: 0,
            unmatched_truth: 0,
            duration_ms: 0,
            forecast: None,
            backtest_records: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Succeeded)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.status {
            OutcomeStatus::Succeeded => None,
            OutcomeStatus::Failed { kind, .. } => Some(*kind),
        }
    }
}

/// Result of [`Pipeline::run`](crate::pipeline::Pipeline::run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: RunId,
    pub name: String,
    pub data_set_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<IdentifierOutcome>,
}

impl PipelineReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome(&self, identifier: &str) -> Option<&IdentifierOutcome> {
        self.outcomes.iter().find(|o| o.identifier == identifier)
    }

    /// Failed identifiers with their error kind and message.
    pub fn failures(&self) -> impl Iterator<Item = (&str, ErrorKind, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            OutcomeStatus::Failed { kind, message, .. } => {
                Some((o.identifier.as_str(), *kind, message.as_str()))
            }
            OutcomeStatus::Succeeded => None,
        })
    }
}
