use crate::harvest::traits::HarvestRecord;
use crate::model::WorkKey;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Reason a single fetch did not produce a value. Every kind is absorbed by
/// the pipeline: the key is dropped and counted, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Record not found")]
    NotFound,
    #[error("Record is missing required fields: {0}")]
    Incomplete(String),
    #[error("Transient fetch failure: {0}")]
    Transient(String),
    #[error("Fetch timed out after {0}ms")]
    Timeout(u64),
    #[error("Fetch limiter unavailable: {0}")]
    Unavailable(String),
}

/// Coarse classification of [`FetchError`] used for drop counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    NotFound,
    Incomplete,
    Transient,
    Timeout,
    Unavailable,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::NotFound => FetchErrorKind::NotFound,
            FetchError::Incomplete(_) => FetchErrorKind::Incomplete,
            FetchError::Transient(_) => FetchErrorKind::Transient,
            FetchError::Timeout(_) => FetchErrorKind::Timeout,
            FetchError::Unavailable(_) => FetchErrorKind::Unavailable,
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Record type produced by the primary fetch.
    type Record: HarvestRecord;

    /// Returns a short identifier of the remote source, used in logs.
    fn source_id(&self) -> &str;

    /// Fetches the primary record for `key`.
    async fn fetch(&self, key: WorkKey) -> Result<Self::Record, FetchError>;

    /// Whether [`Fetcher::fetch_enrichment`] should be called after a
    /// successful primary fetch.
    fn has_enrichment(&self) -> bool {
        false
    }

    /// Fetches best-effort secondary data for `key`.
    async fn fetch_enrichment(
        &self,
        _key: WorkKey,
    ) -> Result<<Self::Record as HarvestRecord>::Enrichment, FetchError> {
        Err(FetchError::Unavailable(
            "enrichment not supported by this fetcher".to_string(),
        ))
    }
}
