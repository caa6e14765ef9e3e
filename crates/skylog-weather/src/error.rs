//! Error taxonomy for the weather pipeline.
//!
//! Fetch and normalization failures are scoped to a single endpoint and
//! collected by the orchestrator; storage failures abort the whole batch.

use thiserror::Error;

use crate::types::RecordKind;

/// Failures while fetching or normalizing one upstream endpoint.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request itself is malformed; no network call was made.
    #[error("invalid location: {0}")]
    InvalidLocation(String),

    /// Well-formed request for a place the provider cannot resolve.
    #[error("location not found: {0}")]
    LocationNotFound(String),

    /// The provider is throttling us.
    #[error("rate limited by upstream{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<u64> },

    /// Timeout or transport failure, including provider 5xx responses.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The response arrived but does not have the shape this pipeline
    /// expects.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The provider rejected our credentials.
    #[error("invalid API key")]
    InvalidApiKey,
}

fn retry_after_suffix(retry_after: &Option<u64>) -> String {
    match retry_after {
        Some(secs) => format!(", retry after {secs}s"),
        None => String::new(),
    }
}

impl FetchError {
    /// Whether another attempt could plausibly succeed. Provider verdicts
    /// (rate limit, unknown location, bad key) are terminal per call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::UpstreamUnavailable(_))
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::UpstreamUnavailable("request timed out".to_string())
        } else if err.is_connect() {
            FetchError::UpstreamUnavailable(format!("connection failed: {err}"))
        } else if err.is_decode() {
            FetchError::MalformedPayload(err.to_string())
        } else {
            FetchError::UpstreamUnavailable(err.to_string())
        }
    }
}

/// Failures from the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached or a statement failed outright.
    #[error("persistence unavailable: {0}")]
    Unavailable(String),

    /// A record violated a required field constraint. This signals a
    /// normalizer contract breach and is surfaced, never dropped.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::ConstraintViolation(err.to_string())
            }
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

/// Failures that abort an entire ingest call.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Every endpoint failed; nothing was persisted. One failure per
    /// endpoint, in fetch order.
    #[error("all upstream endpoints failed: {}", format_failures(.0))]
    AllEndpointsFailed(Vec<(RecordKind, FetchError)>),

    /// The batch write failed; the store was left untouched by this call.
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn format_failures(failures: &[(RecordKind, FetchError)]) -> String {
    failures
        .iter()
        .map(|(kind, err)| format!("{kind}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}
