//! REST series store for a CDF-style time-series API.
//!
//! All calls are JSON `POST`s under `{base_url}/api/v1/projects/{project}`:
//!
//! | Operation            | Endpoint                  |
//! |----------------------|---------------------------|
//! | look up series       | `/timeseries/byids`       |
//! | create series        | `/timeseries`             |
//! | aggregate datapoints | `/timeseries/data/list`   |
//! | insert datapoints    | `/timeseries/data`        |
//! | look up data set     | `/datasets/byids`         |
//!
//! Each request is retried with exponential backoff on connection errors,
//! 429 and 5xx, unless `max_retries` is 0. The shared circuit breaker trips
//! immediately on 401/403 and after repeated failures, after which calls
//! fail fast.

use super::circuit_breaker::CircuitBreaker;
use super::{check_points, DataSetRef, SeriesStatus, SeriesStore, StoreError};
use crate::series::{Aggregation, DataPoint, Granularity, RawSeries, SeriesPoint};
use chrono::{DateTime, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Aggregate datapoints returned per request.
const AGGREGATE_LIMIT: usize = 10_000;

/// Datapoints sent per insert request.
const INSERT_CHUNK: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpStoreConfig {
    pub base_url: String,
    pub project: String,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl HttpStoreConfig {
    pub fn new(base_url: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            project: project.into(),
            token: None,
            timeout_secs: 30,
            max_retries: 3,
            base_delay_ms: 500,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Send each request once. Use when the caller runs its own retry loop.
    pub fn without_retries(mut self) -> Self {
        self.max_retries = 0;
        self
    }

    /// Cap the per-request client timeout.
    pub fn with_timeout_at_most(mut self, secs: u64) -> Self {
        self.timeout_secs = self.timeout_secs.min(secs.max(1));
        self
    }

    /// Sleep before retry number `attempt` (1-based).
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/api/v1/projects/{}{path}",
            self.base_url.trim_end_matches('/'),
            self.project
        )
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ByIdsRequest {
    items: Vec<ExternalIdItem>,
    ignore_unknown_ids: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExternalIdItem {
    external_id: String,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeSeriesItem {
    external_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataSetItem {
    id: u64,
    external_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSeriesRequest {
    items: Vec<NewSeries>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewSeries {
    external_id: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_set_id: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DataListRequest {
    items: Vec<DataQuery>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DataQuery {
    external_id: String,
    start: i64,
    end: i64,
    aggregates: Vec<String>,
    granularity: String,
    limit: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataListItem {
    #[serde(default)]
    datapoints: Vec<AggregatePoint>,
}

#[derive(Debug, Deserialize)]
struct AggregatePoint {
    timestamp: i64,
    average: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
    sum: Option<f64>,
    count: Option<f64>,
}

impl AggregatePoint {
    fn value(&self, aggregation: Aggregation) -> Option<f64> {
        match aggregation {
            Aggregation::Average => self.average,
            Aggregation::Min => self.min,
            Aggregation::Max => self.max,
            Aggregation::Sum => self.sum,
            Aggregation::Count => self.count,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertRequest {
    items: Vec<InsertItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertItem {
    external_id: String,
    datapoints: Vec<WirePoint>,
}

#[derive(Debug, Serialize)]
struct WirePoint {
    timestamp: i64,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    missing: Vec<serde_json::Value>,
}

// ── Store ───────────────────────────────────────────────────────────

pub struct HttpSeriesStore {
    client: reqwest::blocking::Client,
    config: HttpStoreConfig,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl HttpSeriesStore {
    pub fn new(config: HttpStoreConfig, circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::Unreachable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            circuit_breaker,
        })
    }

    pub fn config(&self) -> &HttpStoreConfig {
        &self.config
    }

    /// POST `body` to `path` with retry and circuit breaker logic.
    fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R, StoreError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(StoreError::CircuitBreakerTripped);
        }

        let url = self.config.endpoint(path);
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.config.backoff_delay(attempt);
                debug!(%url, attempt, ?delay, "retrying request");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(StoreError::CircuitBreakerTripped);
            }

            let mut request = self.client.post(&url).json(body);
            if let Some(token) = &self.config.token {
                request = request.bearer_auth(token);
            }

            match request.send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::UNAUTHORIZED
                        || status == reqwest::StatusCode::FORBIDDEN
                    {
                        warn!(%url, %status, "store rejected credentials, tripping circuit breaker");
                        self.circuit_breaker.trip();
                        return Err(StoreError::CircuitBreakerTripped);
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        self.circuit_breaker.record_failure();
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(1);
                        last_error = Some(StoreError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if status.is_server_error() {
                        self.circuit_breaker.record_failure();
                        last_error = Some(StoreError::Unreachable(format!("HTTP {status} from {path}")));
                        continue;
                    }

                    if !status.is_success() {
                        let text = resp.text().unwrap_or_default();
                        return Err(client_error(status, &text));
                    }

                    let parsed: R = resp.json().map_err(|e| {
                        StoreError::InvalidResponse(format!("failed to parse response from {path}: {e}"))
                    })?;
                    self.circuit_breaker.record_success();
                    return Ok(parsed);
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(StoreError::Unreachable(e.to_string()));
                        continue;
                    }
                    return Err(StoreError::Unreachable(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| StoreError::Unreachable("max retries exceeded".into())))
    }

    fn series_exists(&self, identifier: &str) -> Result<bool, StoreError> {
        let resp: ItemsResponse<TimeSeriesItem> =
            self.post("/timeseries/byids", &by_external_id(identifier))?;
        Ok(resp
            .items
            .iter()
            .any(|item| item.external_id.as_deref() == Some(identifier)))
    }
}

impl SeriesStore for HttpSeriesStore {
    fn name(&self) -> &str {
        "http"
    }

    fn retrieve_history(
        &self,
        identifier: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        aggregation: Aggregation,
        granularity: Granularity,
    ) -> Result<RawSeries, StoreError> {
        let end_ms = to_millis(end);
        let mut cursor = to_millis(start);
        let mut points: Vec<SeriesPoint> = Vec::new();

        while cursor < end_ms {
            let body = data_list_request(identifier, cursor, end_ms, aggregation, granularity);
            let resp: ItemsResponse<DataListItem> = self.post("/timeseries/data/list", &body)?;
            let item = resp.items.into_iter().next().ok_or_else(|| StoreError::SeriesNotFound {
                identifier: identifier.to_string(),
            })?;
            let page_len = item.datapoints.len();
            let page = parse_datapoints(&item.datapoints, aggregation)?;

            let Some(last) = page.last().map(|p| p.timestamp) else {
                break;
            };
            points.extend(page);
            if page_len < AGGREGATE_LIMIT {
                break;
            }
            cursor = to_millis(last) + granularity.seconds() * 1000;
        }

        debug!(identifier, points = points.len(), "retrieved history");
        RawSeries::new(identifier, points).map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }

    fn ensure_series_exists(
        &self,
        identifier: &str,
        data_set_id: Option<u64>,
    ) -> Result<SeriesStatus, StoreError> {
        if self.series_exists(identifier)? {
            return Ok(SeriesStatus::Existing);
        }
        let body = CreateSeriesRequest {
            items: vec![NewSeries {
                external_id: identifier.to_string(),
                name: identifier.to_string(),
                data_set_id,
            }],
        };
        let _: ItemsResponse<TimeSeriesItem> = self.post("/timeseries", &body)?;
        Ok(SeriesStatus::Created)
    }

    fn write_points(&self, identifier: &str, points: &[DataPoint]) -> Result<usize, StoreError> {
        check_points(identifier, points)?;
        for chunk in points.chunks(INSERT_CHUNK) {
            let body = insert_request(identifier, chunk);
            let _: serde_json::Value = self.post("/timeseries/data", &body)?;
        }
        Ok(points.len())
    }

    fn resolve_data_set(&self, data_set: &DataSetRef) -> Result<u64, StoreError> {
        let xid = match data_set {
            DataSetRef::Id(id) => return Ok(*id),
            DataSetRef::ExternalId(xid) => xid,
        };
        let resp: ItemsResponse<DataSetItem> = self.post("/datasets/byids", &by_external_id(xid))?;
        resp.items
            .into_iter()
            .find(|item| item.external_id.as_deref() == Some(xid.as_str()))
            .map(|item| item.id)
            .ok_or_else(|| StoreError::DataSetNotFound {
                data_set: data_set.to_string(),
            })
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

fn to_millis(ts: NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_millis()
}

fn by_external_id(external_id: &str) -> ByIdsRequest {
    ByIdsRequest {
        items: vec![ExternalIdItem {
            external_id: external_id.to_string(),
        }],
        ignore_unknown_ids: true,
    }
}

fn data_list_request(
    identifier: &str,
    start_ms: i64,
    end_ms: i64,
    aggregation: Aggregation,
    granularity: Granularity,
) -> DataListRequest {
    DataListRequest {
        items: vec![DataQuery {
            external_id: identifier.to_string(),
            start: start_ms,
            end: end_ms,
            aggregates: vec![aggregation.as_str().to_string()],
            granularity: granularity.to_string(),
            limit: AGGREGATE_LIMIT,
        }],
    }
}

fn insert_request(identifier: &str, points: &[DataPoint]) -> InsertRequest {
    InsertRequest {
        items: vec![InsertItem {
            external_id: identifier.to_string(),
            datapoints: points
                .iter()
                .map(|p| WirePoint {
                    timestamp: to_millis(p.timestamp),
                    value: p.value,
                })
                .collect(),
        }],
    }
}

/// Aggregate datapoints to series points. A bucket without the requested
/// aggregate is a missing value.
fn parse_datapoints(
    datapoints: &[AggregatePoint],
    aggregation: Aggregation,
) -> Result<Vec<SeriesPoint>, StoreError> {
    datapoints
        .iter()
        .map(|dp| {
            let ts = DateTime::from_timestamp_millis(dp.timestamp)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| {
                    StoreError::InvalidResponse(format!("invalid timestamp: {}", dp.timestamp))
                })?;
            Ok(SeriesPoint::new(ts, dp.value(aggregation)))
        })
        .collect()
}

/// Map a non-retryable 4xx. A 400 naming missing external ids is `SeriesNotFound`.
fn client_error(status: reqwest::StatusCode, body: &str) -> StoreError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => {
            let missing = parsed.error.missing.iter().find_map(|m| {
                m.get("externalId")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            });
            match missing {
                Some(identifier) => StoreError::SeriesNotFound { identifier },
                None => StoreError::InvalidResponse(format!("HTTP {status}: {}", parsed.error.message)),
            }
        }
        Err(_) => StoreError::InvalidResponse(format!("HTTP {status}: {body}")),
    }
}
