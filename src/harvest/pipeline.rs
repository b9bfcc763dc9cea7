//! Partitioned harvest pipeline.
//!
//! This module provides the [`HarvestPipeline`] coordinator that drives a
//! [`Fetcher`] over every key produced by a [`TaskSource`]:
//! - One async worker per partition, each owning its result buffer exclusively
//! - A shared [`HarvesterExecutor`] bounding concurrent fetches independently
//!   of the partition count
//! - Per-key failures absorbed and counted, never retried
//! - A [`Collator`] join barrier that concatenates partitions in index order
//!   only after every worker has handed off its result
//! - Graceful shutdown via `CancellationToken`, checked between keys

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::executor::HarvesterExecutor;
use crate::harvest::partition::{Partition, TaskSource};
use crate::harvest::progress::ProgressTracker;
use crate::harvest::traits::{FlatRecord, HarvestError, HarvestRecord, ResultSink, SinkError};
use crate::traits::{FetchErrorKind, Fetcher};

// ============================================================================
// Pipeline Types
// ============================================================================

/// Counters describing one harvest run (or one partition of it).
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct HarvestStats {
    /// Keys produced by the task source
    pub keys_total: u64,

    /// Keys pulled by a worker and handed to the fetcher
    pub keys_attempted: u64,

    /// Records appended to the result
    pub records: u64,

    /// Dropped keys by failure kind
    pub drops: BTreeMap<FetchErrorKind, u64>,

    /// Records kept without enrichment because the secondary fetch failed
    pub enrichment_failures: u64,

    /// Keys never attempted because the run was cancelled
    pub keys_skipped: u64,

    /// Wall-clock duration of the run (milliseconds)
    pub total_duration_ms: u64,
}

impl HarvestStats {
    pub fn record_drop(&mut self, kind: FetchErrorKind) {
        *self.drops.entry(kind).or_insert(0) += 1;
    }

    /// Total number of dropped keys across all kinds.
    pub fn dropped(&self) -> u64 {
        self.drops.values().sum()
    }

    /// Adds the per-key counters of `other`. Totals and durations are owned
    /// by the run, not by partitions, and are left untouched.
    pub fn merge(&mut self, other: &HarvestStats) {
        self.keys_attempted += other.keys_attempted;
        self.records += other.records;
        self.enrichment_failures += other.enrichment_failures;
        self.keys_skipped += other.keys_skipped;
        for (kind, count) in &other.drops {
            *self.drops.entry(*kind).or_insert(0) += count;
        }
    }
}

/// Records produced by one worker, in discovery order.
#[derive(Debug)]
pub struct PartitionResult<R> {
    pub index: usize,
    pub records: Vec<R>,
    pub stats: HarvestStats,
}

/// Final output of a run.
#[derive(Debug)]
pub struct HarvestResult<R> {
    /// Every successful record: partitions in index order, each in
    /// discovery order
    pub records: Vec<R>,

    pub stats: HarvestStats,

    /// Whether cancellation left keys unattempted
    pub cancelled: bool,
}

// ============================================================================
// Collator
// ============================================================================

/// Join barrier over the single-use completion signals of every worker.
pub struct Collator<R> {
    pending: Vec<(usize, oneshot::Receiver<PartitionResult<R>>)>,
}

impl<R> Default for Collator<R> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
        }
    }
}

impl<R> Collator<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers partition `index` and returns the sender its worker uses to
    /// hand off its result.
    pub fn register(&mut self, index: usize) -> oneshot::Sender<PartitionResult<R>> {
        let (tx, rx) = oneshot::channel();
        self.pending.push((index, rx));
        tx
    }

    pub fn expected(&self) -> usize {
        self.pending.len()
    }

    /// Waits for every registered partition, in whatever order they finish,
    /// then concatenates their records by partition index.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::WorkerLost`] as soon as any worker drops its
    /// sender without delivering a result. Nothing is concatenated in that
    /// case.
    pub async fn join(self) -> Result<(Vec<R>, HarvestStats), HarvestError> {
        let mut delivered = Vec::with_capacity(self.pending.len());
        let mut arrivals: FuturesUnordered<_> = self
            .pending
            .into_iter()
            .map(|(index, rx)| async move { (index, rx.await) })
            .collect();

        while let Some((index, outcome)) = arrivals.next().await {
            let result = outcome.map_err(|_| HarvestError::WorkerLost { partition: index })?;
            delivered.push(result);
        }

        delivered.sort_by_key(|result| result.index);

        let total: usize = delivered.iter().map(|result| result.records.len()).sum();
        let mut records = Vec::with_capacity(total);
        let mut stats = HarvestStats::default();
        for result in delivered {
            stats.merge(&result.stats);
            records.extend(result.records);
        }
        Ok((records, stats))
    }
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// Bounded-concurrency harvester over a partitioned key range.
///
/// # Example
///
/// ```ignore
/// use record_harvester::harvest::{HarvestPipeline, KeyRange, TaskSource};
///
/// let source = TaskSource::new(KeyRange::new(1, 10, 1)?, 2)?;
/// let pipeline = HarvestPipeline::new(fetcher, 2);
/// let result = pipeline.execute(&source).await?;
/// println!("Harvested {} records", result.records.len());
/// ```
pub struct HarvestPipeline<F>
where
    F: Fetcher + 'static,
{
    fetcher: Arc<F>,

    executor: Arc<HarvesterExecutor>,

    /// Concurrency limit, also the divisor of the ETA
    worker_count: usize,

    cancel: CancellationToken,
}

impl<F> HarvestPipeline<F>
where
    F: Fetcher + 'static,
{
    /// Creates a pipeline allowing at most `worker_count` concurrent fetches.
    ///
    /// Default configuration:
    /// - No per-fetch timeout
    /// - A fresh cancellation token (see [`HarvestPipeline::cancellation_token`])
    pub fn new(fetcher: F, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        Self {
            fetcher: Arc::new(fetcher),
            executor: Arc::new(HarvesterExecutor::new(worker_count)),
            worker_count,
            cancel: CancellationToken::new(),
        }
    }

    /// Sets the timeout applied to every fetcher call.
    pub fn with_fetch_timeout(mut self, fetch_timeout: Option<Duration>) -> Self {
        self.executor =
            Arc::new(HarvesterExecutor::new(self.worker_count).with_fetch_timeout(fetch_timeout));
        self
    }

    /// Uses `token` to stop the run between keys.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the run when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fetches every key of `source` and collates the successful records.
    ///
    /// Spawns one worker per partition. Per-key failures are counted in
    /// [`HarvestStats::drops`] and never surface here.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::WorkerLost`] if a worker terminates abnormally.
    /// The remaining workers are cancelled right away.
    #[instrument(skip_all, fields(source = self.fetcher.source_id()))]
    pub async fn execute(
        &self,
        source: &TaskSource,
    ) -> Result<HarvestResult<F::Record>, HarvestError> {
        let start = Instant::now();
        let harvest_started = Utc::now();
        let partitions = source.partitions();
        let keys_total = source.total_keys();

        info!(
            keys = keys_total,
            partitions = partitions.len(),
            workers = self.worker_count,
            "Starting harvest"
        );

        let progress = Arc::new(ProgressTracker::new(keys_total, self.worker_count));
        let run_token = self.cancel.child_token();
        let mut collator = Collator::new();

        for partition in partitions {
            let done = collator.register(partition.index);
            let worker = Worker {
                fetcher: self.fetcher.clone(),
                executor: self.executor.clone(),
                progress: progress.clone(),
                cancel: run_token.clone(),
                harvest_started,
            };
            tokio::spawn(async move {
                let result = worker.run(partition).await;
                // The receiver only goes away if the collator was dropped.
                let _ = done.send(result);
            });
        }

        let (records, mut stats) = match collator.join().await {
            Ok(collated) => collated,
            Err(err) => {
                run_token.cancel();
                warn!(error = %err, "Worker lost, cancelling remaining partitions");
                return Err(err);
            }
        };

        stats.keys_total = keys_total;
        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        let cancelled = stats.keys_skipped > 0;

        info!(
            records = stats.records,
            dropped = stats.dropped(),
            enrichment_failures = stats.enrichment_failures,
            skipped = stats.keys_skipped,
            duration_ms = stats.total_duration_ms,
            cancelled,
            "Harvest completed"
        );

        Ok(HarvestResult {
            records,
            stats,
            cancelled,
        })
    }

    /// Runs [`HarvestPipeline::execute`], then opens a sink with `open_sink`
    /// and hands it the aggregate exactly once.
    ///
    /// The sink is only opened after every worker has delivered, so a failed
    /// run never touches the output.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Sink`] if the sink cannot be opened or fails,
    /// after all in-memory work has completed.
    pub async fn harvest_into<S, O>(
        &self,
        source: &TaskSource,
        open_sink: O,
    ) -> Result<HarvestResult<F::Record>, HarvestError>
    where
        O: FnOnce() -> Result<S, SinkError>,
        S: ResultSink<F::Record>,
        F::Record: FlatRecord,
    {
        let result = self.execute(source).await?;
        let mut sink = open_sink()?;

        let write_start = Instant::now();
        sink.write(&result.records)?;
        info!(
            format = sink.format_name(),
            records = result.records.len(),
            duration_ms = write_start.elapsed().as_millis() as u64,
            "Results written"
        );

        Ok(result)
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Worker<F: Fetcher> {
    fetcher: Arc<F>,
    executor: Arc<HarvesterExecutor>,
    progress: Arc<ProgressTracker>,
    cancel: CancellationToken,
    harvest_started: DateTime<Utc>,
}

impl<F: Fetcher> Worker<F> {
    async fn run(self, partition: Partition) -> PartitionResult<F::Record> {
        let index = partition.index;
        let mut records = Vec::new();
        let mut stats = HarvestStats::default();

        debug!(partition = index, keys = partition.len(), "Worker started");

        for key in partition.keys() {
            if self.cancel.is_cancelled() {
                stats.keys_skipped = partition.len() - stats.keys_attempted;
                warn!(
                    partition = index,
                    skipped = stats.keys_skipped,
                    "Worker cancelled, handing off partial result"
                );
                break;
            }

            self.progress.key_pulled();
            stats.keys_attempted += 1;

            match self
                .executor
                .execute(self.fetcher.as_ref(), key, self.harvest_started)
                .await
            {
                Ok(fetched) => {
                    debug_assert_eq!(fetched.record.key(), key, "record carries a foreign key");
                    if fetched.enrichment_error.is_some() {
                        stats.enrichment_failures += 1;
                    }
                    records.push(fetched.record);
                    stats.records += 1;
                    self.progress.record_success(index, key, fetched.elapsed);
                }
                Err(err) => {
                    debug!(partition = index, key = key.get(), error = %err, "Dropping key");
                    stats.record_drop(err.kind());
                }
            }
        }

        debug!(
            partition = index,
            records = stats.records,
            dropped = stats.dropped(),
            "Worker finished"
        );

        PartitionResult {
            index,
            records,
            stats,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
