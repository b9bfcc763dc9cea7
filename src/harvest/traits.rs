//! Record, sink, and error contracts shared by the harvest pipeline.
//!
//! The pipeline itself never looks inside a record. It relies on:
//! - [`HarvestRecord`] to learn a record's key and merge enrichment data
//! - [`FlatRecord`] to hand records to a [`ResultSink`] as flat scalar rows
//! - the error types below, one per failure class of a run

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::WorkKey;
use crate::traits::FetchError;

// ============================================================================
// Record Traits
// ============================================================================

/// A value produced by a [`Fetcher`](crate::traits::Fetcher) for one key.
///
/// Records cross task boundaries, so they must be `Send + 'static`.
pub trait HarvestRecord: Send + 'static {
    /// Secondary data that can be merged into the record after a successful
    /// primary fetch.
    type Enrichment: Send + 'static;

    /// Key this record was fetched for.
    fn key(&self) -> WorkKey;

    /// Merges enrichment into the record.
    ///
    /// `harvest_started` is the wall-clock start of the run; temporal
    /// aggregates may use it to discard events dated in the future.
    fn apply_enrichment(&mut self, enrichment: Self::Enrichment, harvest_started: DateTime<Utc>);
}

/// Scalar value of one output column.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Unsigned(u64),
    Text(String),
    /// Rendered as `YYYY/MM/DD HH:MM:SS`; `None` renders as empty.
    Timestamp(Option<DateTime<Utc>>),
}

/// A record that can be rendered as one row of named scalar fields.
///
/// `fields()` must return values in the same order as `columns()`.
pub trait FlatRecord {
    fn columns() -> &'static [&'static str];

    fn fields(&self) -> Vec<FieldValue>;
}

// ============================================================================
// Sink Trait
// ============================================================================

/// Serialization boundary for the collated result.
///
/// A sink is invoked once per run with the whole aggregate.
pub trait ResultSink<R: FlatRecord> {
    /// Returns the output format identifier (e.g., `"csv"`).
    fn format_name(&self) -> &'static str;

    /// Writes every record, in order, as one row each.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if encoding or the underlying writer fails.
    fn write(&mut self, records: &[R]) -> Result<(), SinkError>;
}

impl<R: FlatRecord, S: ResultSink<R> + ?Sized> ResultSink<R> for Box<S> {
    fn format_name(&self) -> &'static str {
        (**self).format_name()
    }

    fn write(&mut self, records: &[R]) -> Result<(), SinkError> {
        (**self).write(records)
    }
}

impl<R: FlatRecord, S: ResultSink<R> + ?Sized> ResultSink<R> for &mut S {
    fn format_name(&self) -> &'static str {
        (**self).format_name()
    }

    fn write(&mut self, records: &[R]) -> Result<(), SinkError> {
        (**self).write(records)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Invalid run parameters. Raised before any work starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("worker count must be at least 1")]
    ZeroWorkers,

    #[error("stride must be at least 1")]
    ZeroStride,

    #[error("start key must be at least 1")]
    ZeroStartKey,

    #[error("partition count must be at least 1")]
    ZeroPartitions,

    #[error("start key {start} is greater than max key {max}")]
    EmptyRange { start: u64, max: u64 },

    #[error("invalid configuration file: {0}")]
    InvalidFile(String),
}

/// Failure of the secondary fetch. The primary record survives with its
/// enrichment fields left at their zero values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("enrichment for key {key} failed: {source}")]
pub struct EnrichmentError {
    pub key: WorkKey,
    #[source]
    pub source: FetchError,
}

/// Failure to serialize or persist the aggregate.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error while writing results: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode record: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for SinkError {
    fn from(value: serde_json::Error) -> Self {
        SinkError::Encode(value.to_string())
    }
}

/// Errors that terminate a harvest run.
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// A worker ended without handing off its partition (e.g., it panicked)
    #[error("Worker for partition {partition} terminated without delivering results")]
    WorkerLost { partition: usize },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enrichment_error_exposes_source() {
        let err = EnrichmentError {
            key: WorkKey(9),
            source: FetchError::NotFound,
        };
        assert_eq!(err.to_string(), "enrichment for key 9 failed: Record not found");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_configuration_error_converts_to_harvest_error() {
        let err: HarvestError = ConfigurationError::ZeroStride.into();
        assert!(matches!(
            err,
            HarvestError::Configuration(ConfigurationError::ZeroStride)
        ));
    }

    #[test]
    fn test_json_error_becomes_encode_error() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: SinkError = json_err.into();
        assert!(matches!(err, SinkError::Encode(_)));
    }
}
