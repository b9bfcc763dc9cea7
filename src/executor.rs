use crate::harvest::traits::{EnrichmentError, HarvestRecord};
use crate::model::WorkKey;
use crate::traits::{FetchError, Fetcher};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, instrument};

/// A record produced for one key, with the outcome of its enrichment.
#[derive(Debug)]
pub struct FetchedRecord<R> {
    pub record: R,
    /// Set when the secondary fetch failed and the record kept zero values
    pub enrichment_error: Option<EnrichmentError>,
    /// Time spent fetching this key, excluding the wait for a permit
    pub elapsed: Duration,
}

/// Runs per-key fetches under a global concurrency limit and an optional
/// per-call timeout.
pub struct HarvesterExecutor {
    semaphore: Arc<Semaphore>,
    fetch_timeout: Option<Duration>,
}

impl HarvesterExecutor {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
            fetch_timeout: None,
        }
    }

    /// Bounds every fetcher call; a call that exceeds it fails with
    /// [`FetchError::Timeout`].
    pub fn with_fetch_timeout(mut self, fetch_timeout: Option<Duration>) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Closes the limiter. Pending and future fetches fail with
    /// [`FetchError::Unavailable`].
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Fetches `key` and, if the fetcher supports it, merges its enrichment.
    ///
    /// One permit covers both calls. A failed enrichment leaves the record
    /// in place and is reported through [`FetchedRecord::enrichment_error`].
    ///
    /// # Errors
    ///
    /// Returns the primary fetch's [`FetchError`], a timeout, or
    /// [`FetchError::Unavailable`] if the limiter was closed.
    #[instrument(level = "debug", skip(self, fetcher, harvest_started), fields(source = fetcher.source_id()))]
    pub async fn execute<F>(
        &self,
        fetcher: &F,
        key: WorkKey,
        harvest_started: DateTime<Utc>,
    ) -> Result<FetchedRecord<F::Record>, FetchError>
    where
        F: Fetcher + ?Sized,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| FetchError::Unavailable(format!("Semaphore error: {}", e)))?;

        let start = Instant::now();
        let mut record = self.bounded(fetcher.fetch(key)).await?;

        let mut enrichment_error = None;
        if fetcher.has_enrichment() {
            match self.bounded(fetcher.fetch_enrichment(key)).await {
                Ok(enrichment) => record.apply_enrichment(enrichment, harvest_started),
                Err(source) => {
                    debug!(key = key.get(), error = %source, "Enrichment unavailable, keeping record");
                    enrichment_error = Some(EnrichmentError { key, source });
                }
            }
        }

        Ok(FetchedRecord {
            record,
            enrichment_error,
            elapsed: start.elapsed(),
        })
    }

    async fn bounded<T, Fut>(&self, call: Fut) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, FetchError>>,
    {
        match self.fetch_timeout {
            Some(limit) => timeout(limit, call)
                .await
                .map_err(|_| FetchError::Timeout(limit.as_millis() as u64))?,
            None => call.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AchievementSummary, CharacterRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubFetcher {
        delay: Duration,
        enrichment: Option<Result<AchievementSummary, FetchError>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl StubFetcher {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                enrichment: None,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        type Record = CharacterRecord;

        fn source_id(&self) -> &str {
            "stub"
        }

        async fn fetch(&self, key: WorkKey) -> Result<CharacterRecord, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if key.get() == 0 {
                return Err(FetchError::NotFound);
            }
            Ok(CharacterRecord::new(key, format!("Character {}", key)))
        }

        fn has_enrichment(&self) -> bool {
            self.enrichment.is_some()
        }

        async fn fetch_enrichment(&self, _key: WorkKey) -> Result<AchievementSummary, FetchError> {
            self.enrichment
                .clone()
                .unwrap_or(Err(FetchError::Transient("no enrichment".into())))
        }
    }

    #[tokio::test]
    async fn test_execute_returns_record() {
        let executor = HarvesterExecutor::new(1);
        let fetcher = StubFetcher::new(Duration::from_millis(1));

        let fetched = executor.execute(&fetcher, WorkKey(5), Utc::now()).await.unwrap();

        assert_eq!(fetched.record.id, WorkKey(5));
        assert!(fetched.enrichment_error.is_none());
        assert!(fetched.elapsed >= Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_execute_propagates_primary_failure() {
        let executor = HarvesterExecutor::new(1);
        let fetcher = StubFetcher::new(Duration::ZERO);

        let err = executor.execute(&fetcher, WorkKey(0), Utc::now()).await.unwrap_err();
        assert_eq!(err, FetchError::NotFound);
    }

    #[tokio::test]
    async fn test_enrichment_failure_keeps_record() {
        let executor = HarvesterExecutor::new(1);
        let mut fetcher = StubFetcher::new(Duration::ZERO);
        fetcher.enrichment = Some(Err(FetchError::Transient("503".into())));

        let fetched = executor.execute(&fetcher, WorkKey(3), Utc::now()).await.unwrap();

        assert_eq!(fetched.record.achievements, 0);
        assert_eq!(fetched.record.first_achievement, None);
        let err = fetched.enrichment_error.expect("enrichment error recorded");
        assert_eq!(err.key, WorkKey(3));
    }

    #[tokio::test]
    async fn test_enrichment_success_is_merged() {
        let executor = HarvesterExecutor::new(1);
        let mut fetcher = StubFetcher::new(Duration::ZERO);
        fetcher.enrichment = Some(Ok(AchievementSummary {
            dates: vec![],
            total_achievements: 11,
            total_points: 110,
        }));

        let fetched = executor.execute(&fetcher, WorkKey(3), Utc::now()).await.unwrap();

        assert_eq!(fetched.record.achievements, 11);
        assert_eq!(fetched.record.achievement_points, 110);
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let executor =
            HarvesterExecutor::new(1).with_fetch_timeout(Some(Duration::from_millis(20)));
        let fetcher = StubFetcher::new(Duration::from_millis(500));

        let err = executor.execute(&fetcher, WorkKey(1), Utc::now()).await.unwrap_err();
        assert_eq!(err, FetchError::Timeout(20));
    }

    #[tokio::test]
    async fn test_closed_limiter_reports_unavailable() {
        let executor = HarvesterExecutor::new(2);
        executor.close();
        let fetcher = StubFetcher::new(Duration::ZERO);

        let err = executor.execute(&fetcher, WorkKey(1), Utc::now()).await.unwrap_err();
        assert!(matches!(err, FetchError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let executor = Arc::new(HarvesterExecutor::new(2));
        let fetcher = Arc::new(StubFetcher::new(Duration::from_millis(10)));

        let mut handles = Vec::new();
        for i in 1..=8u64 {
            let executor = executor.clone();
            let fetcher = fetcher.clone();
            handles.push(tokio::spawn(async move {
                executor.execute(fetcher.as_ref(), WorkKey(i), Utc::now()).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert!(fetcher.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(executor.available_permits(), 2);
    }
}
