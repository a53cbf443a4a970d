//! ForecastLab CLI: run, seed, store and config commands.
//!
//! Commands:
//! - `run`: execute the forecast pipeline from a TOML config or named preset
//! - `seed`: write deterministic synthetic sensor data into a local store
//! - `store status`: list stored series with point counts and date ranges
//! - `config show`: print a preset as TOML

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use forecastlab_core::series::{DataPoint, Granularity};
use forecastlab_core::store::{
    CircuitBreaker, HttpSeriesStore, HttpStoreConfig, ParquetSeriesStore, SeriesStore,
};
use forecastlab_runner::{
    generate_sensor_series, presets, ArtifactManager, OutcomeStatus, Pipeline, PipelineConfig,
    PipelineReport, SensorProfile,
};

#[derive(Parser)]
#[command(
    name = "forecastlab",
    about = "ForecastLab CLI: sensor forecasting and backtesting pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline from a TOML config file or named preset.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Named preset: compressor, pump.
        #[arg(long)]
        preset: Option<String>,

        /// Local Parquet store directory. Used unless --store-url is given.
        #[arg(long, default_value = "data")]
        store_dir: PathBuf,

        /// Base URL of a remote time-series service.
        #[arg(long)]
        store_url: Option<String>,

        /// Project on the remote service (required with --store-url).
        #[arg(long)]
        project: Option<String>,

        /// Environment variable holding the bearer token.
        #[arg(long, default_value = "FORECASTLAB_TOKEN")]
        token_env: String,

        /// Output directory for run artifacts.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,

        /// Process identifiers in parallel.
        #[arg(long, default_value_t = false)]
        parallel: bool,

        /// Skip the backtest even if the config defines one.
        #[arg(long, default_value_t = false)]
        skip_backtest: bool,
    },
    /// Seed a local store with synthetic sensor data.
    Seed {
        /// Identifiers to generate.
        #[arg(long, required = true, num_args = 1..)]
        identifiers: Vec<String>,

        /// First day (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// Number of days of hourly data.
        #[arg(long, default_value_t = 60)]
        days: u32,

        /// Signal shape: compressor, pump, default.
        #[arg(long, default_value = "default")]
        profile: String,

        /// Store directory. Defaults to ./data.
        #[arg(long, default_value = "data")]
        store_dir: PathBuf,

        /// Numeric data set id to attach series to.
        #[arg(long)]
        data_set_id: Option<u64>,

        /// Register this external id for --data-set-id.
        #[arg(long, requires = "data_set_id")]
        data_set_external_id: Option<String>,
    },
    /// Local store commands.
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
    /// Configuration commands.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// List stored series, point counts and date ranges.
    Status {
        /// Store directory. Defaults to ./data.
        #[arg(long, default_value = "data")]
        store_dir: PathBuf,

        /// Print JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a preset as TOML.
    Show {
        #[arg(long)]
        preset: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            preset,
            store_dir,
            store_url,
            project,
            token_env,
            output_dir,
            parallel,
            skip_backtest,
        } => run_pipeline_cmd(RunArgs {
            config,
            preset,
            store_dir,
            store_url,
            project,
            token_env,
            output_dir,
            parallel,
            skip_backtest,
        }),
        Commands::Seed {
            identifiers,
            start,
            days,
            profile,
            store_dir,
            data_set_id,
            data_set_external_id,
        } => run_seed(
            &identifiers,
            &start,
            days,
            &profile,
            &store_dir,
            data_set_id,
            data_set_external_id.as_deref(),
        ),
        Commands::Store { action } => match action {
            StoreAction::Status { store_dir, json } => run_store_status(&store_dir, json),
        },
        Commands::Config { action } => match action {
            ConfigAction::Show { preset } => {
                let cfg = presets::by_name(&preset)?;
                print!("{}", cfg.to_toml()?);
                Ok(())
            }
        },
    }
}

struct RunArgs {
    config: Option<PathBuf>,
    preset: Option<String>,
    store_dir: PathBuf,
    store_url: Option<String>,
    project: Option<String>,
    token_env: String,
    output_dir: PathBuf,
    parallel: bool,
    skip_backtest: bool,
}

fn run_pipeline_cmd(args: RunArgs) -> Result<()> {
    let mut config = match (&args.config, &args.preset) {
        (Some(_), Some(_)) => bail!("--config and --preset are mutually exclusive"),
        (None, None) => bail!("one of --config or --preset is required"),
        (Some(path), None) => PipelineConfig::from_file(path)?,
        (None, Some(name)) => presets::by_name(name)?,
    };
    if args.skip_backtest {
        config.backtest = None;
    }

    let store = open_store(&args, &config)?;
    let pipeline = Pipeline::new(config).with_parallelism(args.parallel);
    let report = pipeline.run(store.as_ref())?;

    print_summary(&report);

    let artifacts = ArtifactManager::new(&args.output_dir)?;
    let run_dir = artifacts.save_run(&report)?;
    println!("Artifacts saved to: {}", run_dir.display());

    if !report.all_succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

fn open_store(args: &RunArgs, config: &PipelineConfig) -> Result<Box<dyn SeriesStore>> {
    let Some(url) = &args.store_url else {
        return Ok(Box::new(ParquetSeriesStore::new(&args.store_dir)));
    };
    let Some(project) = &args.project else {
        bail!("--project is required with --store-url");
    };

    let mut http_config =
        config.http_store_config(HttpStoreConfig::new(url.clone(), project.clone()));
    match std::env::var(&args.token_env) {
        Ok(token) => http_config = http_config.with_token(token),
        Err(_) => tracing::warn!(var = %args.token_env, "no token in environment, sending unauthenticated requests"),
    }
    let breaker = Arc::new(CircuitBreaker::default_store());
    let store = HttpSeriesStore::new(http_config, breaker)
        .context("failed to build HTTP store client")?;
    Ok(Box::new(store))
}

fn run_seed(
    identifiers: &[String],
    start: &str,
    days: u32,
    profile: &str,
    store_dir: &Path,
    data_set_id: Option<u64>,
    data_set_external_id: Option<&str>,
) -> Result<()> {
    let start_date = NaiveDate::parse_from_str(start, "%Y-%m-%d")
        .with_context(|| format!("invalid --start '{start}', expected YYYY-MM-DD"))?;
    let profile = match profile {
        "compressor" => SensorProfile::compressor(),
        "pump" => SensorProfile::pump(),
        "default" => SensorProfile::default(),
        other => bail!("unknown profile '{other}'. Valid: compressor, pump, default"),
    };

    let store = ParquetSeriesStore::new(store_dir);
    if let (Some(id), Some(xid)) = (data_set_id, data_set_external_id) {
        store.register_data_set(xid, id)?;
        println!("Registered data set {xid} -> {id}");
    }

    let from = start_date.and_time(chrono::NaiveTime::MIN);
    let to = from + chrono::Duration::days(i64::from(days));
    for (i, identifier) in identifiers.iter().enumerate() {
        println!("[{}/{}] Seeding {identifier}...", i + 1, identifiers.len());
        let points: Vec<DataPoint> =
            generate_sensor_series(identifier, from, to, Granularity::HOURLY, &profile)
                .into_iter()
                .map(|(ts, v)| DataPoint::new(ts, v))
                .collect();
        store.ensure_series_exists(identifier, data_set_id)?;
        let written = store.write_points(identifier, &points)?;
        println!("  OK: {written} points");
    }

    Ok(())
}

fn run_store_status(store_dir: &Path, json: bool) -> Result<()> {
    if !store_dir.exists() {
        println!("Store directory does not exist: {}", store_dir.display());
        return Ok(());
    }

    let store = ParquetSeriesStore::new(store_dir);
    let mut rows = store.status()?;
    rows.sort_by(|a, b| a.identifier.cmp(&b.identifier));

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("Store is empty: {}", store_dir.display());
        return Ok(());
    }

    let total_size: u64 = rows.iter().map(|r| r.size_bytes).sum();
    let width = rows
        .iter()
        .map(|r| r.identifier.len())
        .max()
        .unwrap_or(10)
        .max(10);

    println!("Store: {}", store_dir.display());
    println!("Series: {}", rows.len());
    println!("Total size: {}", format_size(total_size));
    println!();
    println!(
        "{:<width$} {:<12} {:<33} {:>8} {:>10}",
        "Identifier", "Data Set", "Range", "Points", "Size"
    );
    println!("{}", "-".repeat(width + 67));
    for r in &rows {
        let range = match (r.start, r.end) {
            (Some(s), Some(e)) => format!("{} to {}", s.format("%Y-%m-%d %H:%M"), e.format("%Y-%m-%d %H:%M")),
            _ => "(empty)".into(),
        };
        let data_set = r
            .data_set_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<width$} {:<12} {:<33} {:>8} {:>10}",
            r.identifier,
            data_set,
            range,
            r.point_count,
            format_size(r.size_bytes)
        );
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn print_summary(report: &PipelineReport) {
    println!();
    println!("=== Pipeline Result ===");
    println!("Name:           {}", report.name);
    println!("Run ID:         {}", report.run_id);
    println!("Data Set:       {}", report.data_set_id);
    println!(
        "Identifiers:    {} ({} succeeded, {} failed)",
        report.total(),
        report.succeeded(),
        report.failed()
    );
    println!(
        "Duration:       {:.1}s",
        (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0
    );
    println!();
    for o in &report.outcomes {
        match &o.status {
            OutcomeStatus::Succeeded => {
                let cap = o.fit.as_ref().map(|f| f.cap).unwrap_or(f64::NAN);
                print!("  OK    {}  cap={cap:.3}  roles={}", o.identifier, o.roles_written.len());
                if let Some(b) = &o.backtest {
                    print!(
                        "  backtest: {} pts, MAE {:.3}, MAPE {:.2}%",
                        b.records, b.mean_absolute_error, b.mean_absolute_percentage_error
                    );
                }
                println!();
            }
            OutcomeStatus::Failed {
                stage,
                kind,
                message,
            } => {
                println!("  FAIL  {}  [{kind} at {stage}] {message}", o.identifier);
                if !o.roles_written.is_empty() {
                    println!("        partial outputs: {} role(s) written", o.roles_written.len());
                }
            }
        }
    }
    println!();
}
