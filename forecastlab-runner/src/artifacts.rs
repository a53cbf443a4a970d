//! Run artifacts: JSON manifest, per-identifier CSV and a Markdown summary.
//!
//! Layout under the output directory:
//!
//! ```text
//! {run_id}/
//!   manifest.json
//!   summary.md
//!   {identifier}/forecast.csv
//!   {identifier}/backtest.csv
//!   {identifier}/yhat.json
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use forecastlab_core::backtest::BacktestRecord;
use forecastlab_core::forecast::ForecastSeries;
use forecastlab_core::store::path_component;

use crate::report::{OutcomeStatus, PipelineReport};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Writes run artifacts under a root directory.
pub struct ArtifactManager {
    root: PathBuf,
}

impl ArtifactManager {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create artifact dir: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    /// Save everything for one run. Returns the run directory.
    pub fn save_run(&self, report: &PipelineReport) -> Result<PathBuf> {
        let run_dir = self.run_dir(&report.run_id);
        std::fs::create_dir_all(&run_dir)
            .with_context(|| format!("failed to create run dir: {}", run_dir.display()))?;

        let manifest =
            serde_json::to_string_pretty(report).context("failed to serialize pipeline report")?;
        write_file(&run_dir.join("manifest.json"), &manifest)?;
        write_file(&run_dir.join("summary.md"), &generate_summary(report))?;

        for outcome in &report.outcomes {
            let Some(fc) = &outcome.forecast else {
                continue;
            };
            let dir = run_dir.join(path_component(&outcome.identifier));
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;

            write_file(&dir.join("forecast.csv"), &export_forecast_csv(fc)?)?;
            write_file(&dir.join("yhat.json"), &export_yhat_json(fc)?)?;
            if !outcome.backtest_records.is_empty() {
                write_file(
                    &dir.join("backtest.csv"),
                    &export_backtest_csv(&outcome.backtest_records)?,
                )?;
            }
        }

        Ok(run_dir)
    }

    /// Load a saved manifest. Bulk series are not part of it.
    pub fn load_manifest(&self, run_id: &str) -> Result<PipelineReport> {
        let path = self.run_dir(run_id).join("manifest.json");
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("failed to parse {}", path.display()))
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

// ─── CSV / JSON ─────────────────────────────────────────────────────

/// Columns: timestamp, yhat, yhat_lower, yhat_upper, trend, cap, is_history
pub fn export_forecast_csv(fc: &ForecastSeries) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "timestamp",
        "yhat",
        "yhat_lower",
        "yhat_upper",
        "trend",
        "cap",
        "is_history",
    ])?;
    for (i, r) in fc.rows().iter().enumerate() {
        wtr.write_record([
            &r.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            &format!("{:.6}", r.yhat),
            &format!("{:.6}", r.yhat_lower),
            &format!("{:.6}", r.yhat_upper),
            &format!("{:.6}", r.trend),
            &format!("{:.6}", r.cap),
            &(i < fc.history_len()).to_string(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Columns: timestamp, ground_truth, forecast, error, absolute_error_percentage, gap_filled
pub fn export_backtest_csv(records: &[BacktestRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "timestamp",
        "ground_truth",
        "forecast",
        "error",
        "absolute_error_percentage",
        "gap_filled",
    ])?;
    for r in records {
        wtr.write_record([
            &r.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            &format!("{:.6}", r.ground_truth),
            &format!("{:.6}", r.forecast),
            &format!("{:.6}", r.signed_error),
            &format!("{:.2}", r.absolute_error_percentage),
            &r.gap_filled.to_string(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Timestamp → yhat over history and horizon.
pub fn export_yhat_json(fc: &ForecastSeries) -> Result<String> {
    let map: BTreeMap<String, f64> = fc
        .rows()
        .iter()
        .map(|r| (r.timestamp.format(TIMESTAMP_FORMAT).to_string(), r.yhat))
        .collect();
    serde_json::to_string_pretty(&map).context("failed to serialize yhat map")
}

// ─── Markdown ───────────────────────────────────────────────────────

pub fn generate_summary(report: &PipelineReport) -> String {
    let mut md = String::with_capacity(1024);

    md.push_str(&format!("# Pipeline Run: {}\n\n", report.name));
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Run ID | {} |\n", report.run_id));
    md.push_str(&format!("| Data Set | {} |\n", report.data_set_id));
    md.push_str(&format!(
        "| Started | {} |\n",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    md.push_str(&format!(
        "| Succeeded | {}/{} |\n",
        report.succeeded(),
        report.total()
    ));
    md.push('\n');

    md.push_str("## Identifiers\n\n");
    md.push_str("| Identifier | Status | Cap | Roles | MAE | MAPE |\n");
    md.push_str("| --- | --- | ---: | ---: | ---: | ---: |\n");
    for o in &report.outcomes {
        let status = match &o.status {
            OutcomeStatus::Succeeded => "ok".to_string(),
            OutcomeStatus::Failed { stage, kind, .. } => format!("**{kind}** at {stage}"),
        };
        let cap = o
            .fit
            .as_ref()
            .map(|f| format!("{:.3}", f.cap))
            .unwrap_or_else(|| "-".into());
        let (mae, mape) = match &o.backtest {
            Some(b) => (
                format!("{:.3}", b.mean_absolute_error),
                format!("{:.2}%", b.mean_absolute_percentage_error),
            ),
            None => ("-".into(), "-".into()),
        };
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            o.identifier,
            status,
            cap,
            o.roles_written.len(),
            mae,
            mape
        ));
    }

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        md.push_str("\n## Failures\n\n");
        for (id, kind, message) in failures {
            md.push_str(&format!("- `{id}` ({kind}): {message}\n"));
        }
    }

    md
}
