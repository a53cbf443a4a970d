//! Series domain types: points, raw and clean series, granularity, output roles.

pub mod granularity;
pub mod point;
pub mod role;

pub use granularity::{aggregate_buckets, Aggregation, Granularity, GranularityError};
pub use point::{CleanSeries, DataPoint, RawSeries, SeriesError, SeriesPoint};
pub use role::OutputRole;
