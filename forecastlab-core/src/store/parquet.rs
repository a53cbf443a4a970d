//! Local series store on Parquet with Hive-style partitioning.
//!
//! Layout: `{dir}/series={IDENTIFIER}/{year}.parquet` plus a `meta.json`
//! sidecar per series. A series exists once its sidecar exists.
//!
//! - Writes merge with stored points by timestamp and replace the touched
//!   year partitions atomically (write `.tmp`, rename into place)
//! - Partitions that fail validation on load are quarantined
//!   (`{year}.parquet.quarantined`) and skipped
//! - Data sets resolve by external id through `{dir}/datasets.json`

use super::{check_points, path_component, DataSetRef, SeriesStatus, SeriesStore, StoreError};
use crate::series::{aggregate_buckets, Aggregation, DataPoint, Granularity, RawSeries};
use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

const META_FILE: &str = "meta.json";
const DATASETS_FILE: &str = "datasets.json";
const SERIES_PREFIX: &str = "series=";

/// Sidecar for one stored series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesMeta {
    pub identifier: String,
    pub name: String,
    pub data_set_id: Option<u64>,
    pub created_at: NaiveDateTime,
    pub point_count: usize,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub data_hash: String,
}

/// One row of [`ParquetSeriesStore::status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesStatusEntry {
    pub identifier: String,
    pub data_set_id: Option<u64>,
    pub point_count: usize,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub size_bytes: u64,
}

pub struct ParquetSeriesStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl ParquetSeriesStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn series_dir(&self, identifier: &str) -> PathBuf {
        self.dir
            .join(format!("{SERIES_PREFIX}{}", path_component(identifier)))
    }

    fn year_path(&self, identifier: &str, year: i32) -> PathBuf {
        self.series_dir(identifier).join(format!("{year}.parquet"))
    }

    fn meta_path(&self, identifier: &str) -> PathBuf {
        self.series_dir(identifier).join(META_FILE)
    }

    pub fn get_meta(&self, identifier: &str) -> Option<SeriesMeta> {
        let content = fs::read_to_string(self.meta_path(identifier)).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn require_meta(&self, identifier: &str) -> Result<SeriesMeta, StoreError> {
        self.get_meta(identifier)
            .ok_or_else(|| StoreError::SeriesNotFound {
                identifier: identifier.to_string(),
            })
    }

    fn write_meta(&self, meta: &SeriesMeta) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(meta)
            .map_err(|e| StoreError::InvalidResponse(format!("meta serialization: {e}")))?;
        let path = self.meta_path(&meta.identifier);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Register `external_id → id` in `datasets.json`.
    pub fn register_data_set(&self, external_id: &str, id: u64) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap();
        fs::create_dir_all(&self.dir)?;
        let mut map = self.load_data_sets()?;
        map.insert(external_id.to_string(), id);
        let json = serde_json::to_string_pretty(&map)
            .map_err(|e| StoreError::InvalidResponse(format!("datasets serialization: {e}")))?;
        fs::write(self.dir.join(DATASETS_FILE), json)?;
        Ok(())
    }

    fn load_data_sets(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let path = self.dir.join(DATASETS_FILE);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| StoreError::InvalidResponse(format!("{}: {e}", path.display())))
    }

    /// Load stored points for the given years (all years if `None`).
    fn load_points(
        &self,
        identifier: &str,
        years: Option<&BTreeSet<i32>>,
    ) -> Result<BTreeMap<NaiveDateTime, f64>, StoreError> {
        let dir = self.series_dir(identifier);
        let mut points = BTreeMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            let year = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<i32>().ok());
            if let (Some(wanted), Some(year)) = (years, year) {
                if !wanted.contains(&year) {
                    continue;
                }
            }

            match load_and_validate_parquet(&path) {
                Ok(rows) => points.extend(rows),
                Err(e) => {
                    let quarantine = path.with_extension("parquet.quarantined");
                    warn!(path = %path.display(), error = %e, "quarantining corrupt partition");
                    if let Err(e) = fs::rename(&path, &quarantine) {
                        warn!(path = %path.display(), error = %e, "failed to quarantine partition");
                    }
                }
            }
        }
        Ok(points)
    }

    /// Every stored series with its sidecar summary, sorted by identifier.
    pub fn status(&self) -> Result<Vec<SeriesStatusEntry>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_series = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(SERIES_PREFIX));
            if !is_series {
                continue;
            }
            let Some(meta) = fs::read_to_string(path.join(META_FILE))
                .ok()
                .and_then(|c| serde_json::from_str::<SeriesMeta>(&c).ok())
            else {
                continue;
            };
            out.push(SeriesStatusEntry {
                identifier: meta.identifier,
                data_set_id: meta.data_set_id,
                point_count: meta.point_count,
                start: meta.start,
                end: meta.end,
                size_bytes: dir_size(&path),
            });
        }
        out.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(out)
    }
}

impl SeriesStore for ParquetSeriesStore {
    fn name(&self) -> &str {
        "parquet"
    }

    fn retrieve_history(
        &self,
        identifier: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        aggregation: Aggregation,
        granularity: Granularity,
    ) -> Result<RawSeries, StoreError> {
        self.require_meta(identifier)?;
        if end <= start {
            return Ok(RawSeries::empty(identifier));
        }
        let years: BTreeSet<i32> = (start.year()..=end.year()).collect();
        let stored = self.load_points(identifier, Some(&years))?;
        let points = aggregate_buckets(stored, start, end, aggregation, granularity);
        debug!(identifier, points = points.len(), "retrieved history");
        RawSeries::new(identifier, points).map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }

    fn ensure_series_exists(
        &self,
        identifier: &str,
        data_set_id: Option<u64>,
    ) -> Result<SeriesStatus, StoreError> {
        let _guard = self.write_lock.lock().unwrap();
        if self.get_meta(identifier).is_some() {
            return Ok(SeriesStatus::Existing);
        }
        fs::create_dir_all(self.series_dir(identifier))?;
        self.write_meta(&SeriesMeta {
            identifier: identifier.to_string(),
            name: identifier.to_string(),
            data_set_id,
            created_at: Utc::now().naive_utc(),
            point_count: 0,
            start: None,
            end: None,
            data_hash: points_hash(&BTreeMap::new())?,
        })?;
        Ok(SeriesStatus::Created)
    }

    fn write_points(&self, identifier: &str, points: &[DataPoint]) -> Result<usize, StoreError> {
        check_points(identifier, points)?;
        let _guard = self.write_lock.lock().unwrap();
        let mut meta = self.require_meta(identifier)?;
        if points.is_empty() {
            return Ok(0);
        }

        let mut merged = self.load_points(identifier, None)?;
        let touched: BTreeSet<i32> = points.iter().map(|p| p.timestamp.year()).collect();
        for p in points {
            merged.insert(p.timestamp, p.value);
        }

        for year in &touched {
            let rows: Vec<(NaiveDateTime, f64)> = merged
                .iter()
                .filter(|(ts, _)| ts.year() == *year)
                .map(|(ts, v)| (*ts, *v))
                .collect();
            let df = points_to_dataframe(&rows)?;
            let path = self.year_path(identifier, *year);
            let tmp_path = path.with_extension("parquet.tmp");
            write_parquet(&df, &tmp_path)?;
            fs::rename(&tmp_path, &path).map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                StoreError::Io(e)
            })?;
        }

        meta.point_count = merged.len();
        meta.start = merged.keys().next().copied();
        meta.end = merged.keys().next_back().copied();
        meta.data_hash = points_hash(&merged)?;
        self.write_meta(&meta)?;
        Ok(points.len())
    }

    fn resolve_data_set(&self, data_set: &DataSetRef) -> Result<u64, StoreError> {
        match data_set {
            DataSetRef::Id(id) => Ok(*id),
            DataSetRef::ExternalId(xid) => self
                .load_data_sets()?
                .get(xid)
                .copied()
                .ok_or_else(|| StoreError::DataSetNotFound {
                    data_set: data_set.to_string(),
                }),
        }
    }

    fn is_available(&self) -> bool {
        true
    }
}

fn to_millis(ts: NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_millis()
}

fn from_millis(ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

fn points_hash(points: &BTreeMap<NaiveDateTime, f64>) -> Result<String, StoreError> {
    let rows: Vec<(i64, f64)> = points.iter().map(|(ts, v)| (to_millis(*ts), *v)).collect();
    let bytes = serde_json::to_vec(&rows)
        .map_err(|e| StoreError::InvalidResponse(format!("hash serialization: {e}")))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn dir_size(path: &Path) -> u64 {
    fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// Timestamps are stored as epoch milliseconds, UTC.
fn points_to_dataframe(rows: &[(NaiveDateTime, f64)]) -> Result<DataFrame, StoreError> {
    let timestamps: Vec<i64> = rows.iter().map(|(ts, _)| to_millis(*ts)).collect();
    let values: Vec<f64> = rows.iter().map(|(_, v)| *v).collect();
    DataFrame::new(vec![
        Column::new("timestamp".into(), timestamps),
        Column::new("value".into(), values),
    ])
    .map_err(|e| StoreError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), StoreError> {
    let file = fs::File::create(path)?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| StoreError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate_parquet(path: &Path) -> Result<Vec<(NaiveDateTime, f64)>, StoreError> {
    let file = fs::File::open(path)?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::Parquet(format!("read: {e}")))?;

    for name in ["timestamp", "value"] {
        if df.column(name).is_err() {
            return Err(StoreError::Parquet(format!("missing column '{name}'")));
        }
    }
    dataframe_to_points(&df)
}

fn dataframe_to_points(df: &DataFrame) -> Result<Vec<(NaiveDateTime, f64)>, StoreError> {
    let map_err = |e: PolarsError| StoreError::Parquet(format!("column read: {e}"));
    let ts_ca = df.column("timestamp").map_err(map_err)?.i64().map_err(map_err)?;
    let value_ca = df.column("value").map_err(map_err)?.f64().map_err(map_err)?;

    let mut out = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let ms = ts_ca
            .get(i)
            .ok_or_else(|| StoreError::Parquet(format!("null timestamp at row {i}")))?;
        let ts = from_millis(ms)
            .ok_or_else(|| StoreError::Parquet(format!("timestamp out of range at row {i}: {ms}")))?;
        if let Some(v) = value_ca.get(i) {
            out.push((ts, v));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use std::env;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_store_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = env::temp_dir().join(format!("forecastlab_store_{}_{id}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn t(h: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 12, 31)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap()
            + Duration::hours(h)
    }

    #[test]
    fn write_and_retrieve_across_year_boundary() {
        let dir = temp_store_dir();
        let store = ParquetSeriesStore::new(&dir);
        store.ensure_series_exists("PUMP_Actual", Some(5)).unwrap();

        let points: Vec<DataPoint> = (0..8).map(|h| DataPoint::new(t(h), 10.0 + h as f64)).collect();
        assert_eq!(store.write_points("PUMP_Actual", &points).unwrap(), 8);
        assert!(store.year_path("PUMP_Actual", 2022).exists());
        assert!(store.year_path("PUMP_Actual", 2023).exists());

        let raw = store
            .retrieve_history("PUMP_Actual", t(0), t(8), Aggregation::Average, Granularity::HOURLY)
            .unwrap();
        assert_eq!(raw.len(), 8);
        assert_eq!(raw.points()[5].value, Some(15.0));

        let meta = store.get_meta("PUMP_Actual").unwrap();
        assert_eq!(meta.point_count, 8);
        assert_eq!(meta.start, Some(t(0)));
        assert_eq!(meta.end, Some(t(7)));
        assert_eq!(meta.data_set_id, Some(5));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn ensure_is_idempotent() {
        let dir = temp_store_dir();
        let store = ParquetSeriesStore::new(&dir);
        assert_eq!(store.ensure_series_exists("S", None).unwrap(), SeriesStatus::Created);
        let created_at = store.get_meta("S").unwrap().created_at;
        assert_eq!(store.ensure_series_exists("S", None).unwrap(), SeriesStatus::Existing);
        assert_eq!(store.get_meta("S").unwrap().created_at, created_at);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn rewrite_upserts_and_keeps_hash_stable() {
        let dir = temp_store_dir();
        let store = ParquetSeriesStore::new(&dir);
        store.ensure_series_exists("S", None).unwrap();
        let points: Vec<DataPoint> = (0..3).map(|h| DataPoint::new(t(h), 1.0)).collect();

        store.write_points("S", &points).unwrap();
        let first = store.get_meta("S").unwrap();
        store.write_points("S", &points).unwrap();
        let second = store.get_meta("S").unwrap();
        assert_eq!(first.data_hash, second.data_hash);
        assert_eq!(second.point_count, 3);

        store.write_points("S", &[DataPoint::new(t(1), 9.0)]).unwrap();
        let raw = store
            .retrieve_history("S", t(0), t(3), Aggregation::Average, Granularity::HOURLY)
            .unwrap();
        assert_eq!(raw.points()[1].value, Some(9.0));
        assert_ne!(store.get_meta("S").unwrap().data_hash, first.data_hash);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_partition_is_quarantined() {
        let dir = temp_store_dir();
        let store = ParquetSeriesStore::new(&dir);
        store.ensure_series_exists("S", None).unwrap();
        store
            .write_points("S", &[DataPoint::new(t(5), 2.0)])
            .unwrap();
        let bad = store.year_path("S", 2023);
        fs::write(&bad, b"not parquet").unwrap();

        let raw = store
            .retrieve_history("S", t(0), t(10), Aggregation::Average, Granularity::HOURLY)
            .unwrap();
        assert!(raw.is_empty());
        assert!(!bad.exists());
        assert!(bad.with_extension("parquet.quarantined").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn failed_quarantine_still_skips_partition() {
        let dir = temp_store_dir();
        let store = ParquetSeriesStore::new(&dir);
        store.ensure_series_exists("S", None).unwrap();
        let bad = store.year_path("S", 2023);
        fs::write(&bad, b"not parquet").unwrap();
        // A non-empty directory at the target makes the rename fail
        let target = bad.with_extension("parquet.quarantined");
        fs::create_dir_all(target.join("occupied")).unwrap();

        let raw = store
            .retrieve_history("S", t(0), t(10), Aggregation::Average, Granularity::HOURLY)
            .unwrap();
        assert!(raw.is_empty());
        assert!(bad.exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn escaped_identifiers_do_not_collide() {
        let dir = temp_store_dir();
        let store = ParquetSeriesStore::new(&dir);
        for (i, id) in ["a/b", "a\\b", "a%2Fb"].iter().enumerate() {
            store.ensure_series_exists(id, None).unwrap();
            store
                .write_points(id, &[DataPoint::new(t(0), i as f64)])
                .unwrap();
        }
        for (i, id) in ["a/b", "a\\b", "a%2Fb"].iter().enumerate() {
            assert_eq!(store.get_meta(id).unwrap().identifier, *id);
            let raw = store
                .retrieve_history(id, t(0), t(1), Aggregation::Average, Granularity::HOURLY)
                .unwrap();
            assert_eq!(raw.points()[0].value, Some(i as f64));
        }
        assert_eq!(store.status().unwrap().len(), 3);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn unknown_series_is_not_found() {
        let dir = temp_store_dir();
        let store = ParquetSeriesStore::new(&dir);
        assert!(matches!(
            store.retrieve_history("NOPE", t(0), t(1), Aggregation::Average, Granularity::HOURLY),
            Err(StoreError::SeriesNotFound { .. })
        ));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn data_sets_resolve_from_registry() {
        let dir = temp_store_dir();
        let store = ParquetSeriesStore::new(&dir);
        store.register_data_set("replica", 1234).unwrap();
        store.register_data_set("other", 7).unwrap();

        assert_eq!(
            store
                .resolve_data_set(&DataSetRef::ExternalId("replica".into()))
                .unwrap(),
            1234
        );
        assert_eq!(store.resolve_data_set(&DataSetRef::Id(5)).unwrap(), 5);
        assert_eq!(
            store
                .resolve_data_set(&DataSetRef::ExternalId("other".into()))
                .unwrap(),
            7
        );
        assert!(matches!(
            store.resolve_data_set(&DataSetRef::ExternalId("missing".into())),
            Err(StoreError::DataSetNotFound { .. })
        ));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn status_lists_series() {
        let dir = temp_store_dir();
        let store = ParquetSeriesStore::new(&dir);
        store.ensure_series_exists("B", None).unwrap();
        store.ensure_series_exists("A", Some(1)).unwrap();
        store.write_points("A", &[DataPoint::new(t(0), 1.0)]).unwrap();

        let status = store.status().unwrap();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].identifier, "A");
        assert_eq!(status[0].point_count, 1);
        assert!(status[0].size_bytes > 0);
        assert_eq!(status[1].point_count, 0);
        let _ = fs::remove_dir_all(&dir);
    }
}
