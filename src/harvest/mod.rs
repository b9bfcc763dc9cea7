//! Harvest module - partitioned, bounded-concurrency record harvesting.
//!
//! This module provides the core of the harvester:
//! - **Partitioning**: [`TaskSource`] splits a key range into contiguous partitions
//! - **Progress**: [`ProgressTracker`] keeps the global remaining count and ETA
//! - **Pipeline**: [`HarvestPipeline`] runs one worker per partition and
//!   collates results behind a join barrier
//! - **Traits**: record and sink contracts plus the run's error types
//! - **Formats**: CSV and JSON lines sinks

pub mod formats;
pub mod partition;
pub mod pipeline;
pub mod progress;
pub mod traits;

// Re-export commonly used types
pub use traits::{
    ConfigurationError, EnrichmentError, FieldValue, FlatRecord, HarvestError, HarvestRecord,
    ResultSink, SinkError,
};

pub use formats::{CsvSink, JsonLinesSink, OutputFormat};
pub use partition::{KeyRange, KeySpan, Partition, TaskSource};
pub use pipeline::{Collator, HarvestPipeline, HarvestResult, HarvestStats, PartitionResult};
pub use progress::{Eta, ProgressSample, ProgressTracker, TimeUnit};
