//! In-process series store.
//!
//! Backs tests and dry runs. Every trait call is counted in [`StoreStats`] so
//! callers can check that existence checks create once and writes land where
//! expected.

use super::{check_points, DataSetRef, SeriesStatus, SeriesStore, StoreError};
use crate::series::{aggregate_buckets, Aggregation, DataPoint, Granularity, RawSeries};
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub retrieve_calls: usize,
    pub ensure_calls: usize,
    pub creations: usize,
    pub write_calls: usize,
    pub points_written: usize,
    pub resolve_calls: usize,
}

#[derive(Debug, Default)]
struct StoredSeries {
    data_set_id: Option<u64>,
    points: BTreeMap<NaiveDateTime, f64>,
}

#[derive(Debug, Default)]
struct Inner {
    series: HashMap<String, StoredSeries>,
    data_sets: HashMap<String, u64>,
    stats: StoreStats,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing series. Does not count as a creation.
    pub fn with_series(
        self,
        identifier: &str,
        points: impl IntoIterator<Item = (NaiveDateTime, f64)>,
    ) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner.series.entry(identifier.to_string()).or_default();
            entry.points.extend(points);
        }
        self
    }

    /// Register a data set resolvable by external id.
    pub fn with_data_set(self, external_id: &str, id: u64) -> Self {
        self.inner
            .lock()
            .unwrap()
            .data_sets
            .insert(external_id.to_string(), id);
        self
    }

    pub fn stats(&self) -> StoreStats {
        self.inner.lock().unwrap().stats
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.inner.lock().unwrap().series.contains_key(identifier)
    }

    /// Stored identifiers, sorted.
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().unwrap().series.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All stored points of a series, in time order.
    pub fn points(&self, identifier: &str) -> Option<Vec<DataPoint>> {
        self.inner.lock().unwrap().series.get(identifier).map(|s| {
            s.points
                .iter()
                .map(|(ts, v)| DataPoint::new(*ts, *v))
                .collect()
        })
    }

    pub fn data_set_of(&self, identifier: &str) -> Option<u64> {
        self.inner
            .lock()
            .unwrap()
            .series
            .get(identifier)
            .and_then(|s| s.data_set_id)
    }
}

impl SeriesStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn retrieve_history(
        &self,
        identifier: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        aggregation: Aggregation,
        granularity: Granularity,
    ) -> Result<RawSeries, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.retrieve_calls += 1;
        let series = inner
            .series
            .get(identifier)
            .ok_or_else(|| StoreError::SeriesNotFound {
                identifier: identifier.to_string(),
            })?;
        let points = aggregate_buckets(
            series.points.iter().map(|(ts, v)| (*ts, *v)),
            start,
            end,
            aggregation,
            granularity,
        );
        RawSeries::new(identifier, points).map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }

    fn ensure_series_exists(
        &self,
        identifier: &str,
        data_set_id: Option<u64>,
    ) -> Result<SeriesStatus, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.ensure_calls += 1;
        if inner.series.contains_key(identifier) {
            return Ok(SeriesStatus::Existing);
        }
        inner.series.insert(
            identifier.to_string(),
            StoredSeries {
                data_set_id,
                points: BTreeMap::new(),
            },
        );
        inner.stats.creations += 1;
        Ok(SeriesStatus::Created)
    }

    fn write_points(&self, identifier: &str, points: &[DataPoint]) -> Result<usize, StoreError> {
        check_points(identifier, points)?;
        let mut inner = self.inner.lock().unwrap();
        inner.stats.write_calls += 1;
        let series = inner
            .series
            .get_mut(identifier)
            .ok_or_else(|| StoreError::SeriesNotFound {
                identifier: identifier.to_string(),
            })?;
        for p in points {
            series.points.insert(p.timestamp, p.value);
        }
        inner.stats.points_written += points.len();
        Ok(points.len())
    }

    fn resolve_data_set(&self, data_set: &DataSetRef) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.resolve_calls += 1;
        match data_set {
            DataSetRef::Id(id) => Ok(*id),
            DataSetRef::ExternalId(xid) => {
                inner
                    .data_sets
                    .get(xid)
                    .copied()
                    .ok_or_else(|| StoreError::DataSetNotFound {
                        data_set: data_set.to_string(),
                    })
            }
        }
    }

    fn is_available(&self) -> bool {
        true
    }
}
