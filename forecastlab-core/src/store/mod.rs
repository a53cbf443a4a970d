//! Series persistence: the store trait and its implementations.
//!
//! The `SeriesStore` trait abstracts over where series live (a CDF-style REST
//! service, a local Parquet tree, process memory) so the pipeline can be run
//! against any of them and mocked in tests.

pub mod circuit_breaker;
pub mod http;
pub mod memory;
pub mod parquet;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use http::{HttpSeriesStore, HttpStoreConfig};
pub use memory::{InMemoryStore, StoreStats};
pub use parquet::{ParquetSeriesStore, SeriesMeta, SeriesStatusEntry};

use crate::series::{Aggregation, DataPoint, Granularity, RawSeries};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Structured errors for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("rate limited by store (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("series not found: {identifier}")]
    SeriesNotFound { identifier: String },

    #[error("data set not found: {data_set}")]
    DataSetNotFound { data_set: String },

    #[error("hard stop: store has refused requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("invalid point for {identifier} at {timestamp}: {reason}")]
    InvalidPoint {
        identifier: String,
        timestamp: NaiveDateTime,
        reason: String,
    },
}

impl StoreError {
    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unreachable(_) | StoreError::RateLimited { .. }
        )
    }
}

/// Outcome of [`SeriesStore::ensure_series_exists`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesStatus {
    Created,
    Existing,
}

/// A data set, by numeric id or by external id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSetRef {
    Id(u64),
    ExternalId(String),
}

impl fmt::Display for DataSetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSetRef::Id(id) => write!(f, "id:{id}"),
            DataSetRef::ExternalId(xid) => write!(f, "external_id:{xid}"),
        }
    }
}

/// A time-series store.
///
/// All operations are keyed by the identifier (external id). Implementations
/// must be safe to share across pipeline worker threads.
pub trait SeriesStore: Send + Sync {
    /// Human-readable name of this store.
    fn name(&self) -> &str;

    /// Aggregated history for `identifier` over `[start, end)`.
    ///
    /// An unknown identifier is `SeriesNotFound`. A known series with no
    /// points in range is an empty `RawSeries`.
    fn retrieve_history(
        &self,
        identifier: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        aggregation: Aggregation,
        granularity: Granularity,
    ) -> Result<RawSeries, StoreError>;

    /// Create the series if absent, named after its identifier and attached
    /// to `data_set_id`. Calling twice creates once.
    fn ensure_series_exists(
        &self,
        identifier: &str,
        data_set_id: Option<u64>,
    ) -> Result<SeriesStatus, StoreError>;

    /// Upsert points by timestamp. Returns the number of points written.
    fn write_points(&self, identifier: &str, points: &[DataPoint]) -> Result<usize, StoreError>;

    /// Resolve a data set reference to its numeric id.
    fn resolve_data_set(&self, data_set: &DataSetRef) -> Result<u64, StoreError>;

    /// Whether the store is currently accepting calls.
    fn is_available(&self) -> bool;
}

/// Reject points a store cannot persist.
pub(crate) fn check_points(identifier: &str, points: &[DataPoint]) -> Result<(), StoreError> {
    match points.iter().find(|p| !p.value.is_finite()) {
        Some(p) => Err(StoreError::InvalidPoint {
            identifier: identifier.to_string(),
            timestamp: p.timestamp,
            reason: format!("non-finite value {}", p.value),
        }),
        None => Ok(()),
    }
}

/// Encode an identifier as a single path component.
///
/// `%` is escaped first so distinct identifiers never share a directory.
pub fn path_component(identifier: &str) -> String {
    let mut out = String::with_capacity(identifier.len());
    for c in identifier.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn path_components_are_distinct() {
        assert_eq!(path_component("PLANT/A"), "PLANT%2FA");
        assert_eq!(path_component("PLANT\\A"), "PLANT%5CA");
        assert_eq!(path_component("PLANT%2FA"), "PLANT%252FA");
        assert_eq!(path_component("USA.TB.KONG"), "USA.TB.KONG");
    }

    #[test]
    fn transient_classification() {
        assert!(StoreError::Unreachable("down".into()).is_transient());
        assert!(StoreError::RateLimited { retry_after_secs: 1 }.is_transient());
        assert!(!StoreError::CircuitBreakerTripped.is_transient());
        assert!(!StoreError::SeriesNotFound {
            identifier: "X".into()
        }
        .is_transient());
    }

    #[test]
    fn data_set_ref_serde_shape() {
        let json = serde_json::to_string(&DataSetRef::ExternalId("replica".into())).unwrap();
        assert_eq!(json, r#"{"external_id":"replica"}"#);
        let back: DataSetRef = serde_json::from_str(r#"{"id":42}"#).unwrap();
        assert_eq!(back, DataSetRef::Id(42));
    }

    #[test]
    fn non_finite_points_are_rejected() {
        let ts = NaiveDate::from_ymd_opt(2023, 2, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let err = check_points("S", &[DataPoint::new(ts, f64::NAN)]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPoint { .. }));
        assert!(check_points("S", &[DataPoint::new(ts, 1.0)]).is_ok());
    }
}
