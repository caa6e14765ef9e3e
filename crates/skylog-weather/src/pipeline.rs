//! Ingestion pipeline: fetch the three upstream endpoints concurrently,
//! normalize what resolved, and persist the combined batch.
//!
//! One failing endpoint never blocks the others; the run only fails
//! outright when all three endpoints fail (nothing touches the store in
//! that case) or when persistence itself fails.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::client::OpenWeatherClient;
use crate::error::{FetchError, IngestError};
use crate::normalize::normalize;
use crate::store::WeatherRepository;
use crate::types::{Candidate, Location, RecordKind};

/// What happened to a single endpoint during one ingest run.
#[derive(Debug)]
pub struct EndpointOutcome {
    pub endpoint: RecordKind,
    pub status: EndpointStatus,
}

#[derive(Debug)]
pub enum EndpointStatus {
    /// Fetch and normalization succeeded, yielding this many candidates.
    Normalized { records: usize },
    /// Fetch or normalization failed; nothing from this endpoint was
    /// persisted.
    Failed { error: FetchError },
}

impl EndpointOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, EndpointStatus::Normalized { .. })
    }
}

/// Summary of one ingest run.
#[derive(Debug)]
pub struct IngestResult {
    pub location: Location,
    pub started_at: DateTime<Utc>,
    pub records_written: usize,
    pub endpoints: Vec<EndpointOutcome>,
}

impl IngestResult {
    pub fn is_full_success(&self) -> bool {
        self.endpoints.iter().all(EndpointOutcome::is_success)
    }

    /// True when at least one endpoint failed. An `Ok` ingest always has
    /// at least one success, so this is the partial-success case.
    pub fn is_partial(&self) -> bool {
        !self.is_full_success()
    }
}

/// Drives fetch, normalize and persist for one location at a time.
#[derive(Clone)]
pub struct WeatherPipeline {
    client: OpenWeatherClient,
    repository: WeatherRepository,
}

impl WeatherPipeline {
    pub fn new(client: OpenWeatherClient, repository: WeatherRepository) -> Self {
        Self { client, repository }
    }

    /// Ingest all three endpoints for a location with no deadline.
    pub async fn ingest(&self, location: &Location) -> Result<IngestResult, IngestError> {
        self.ingest_with_deadline(location, None).await
    }

    /// Ingest all three endpoints for a location.
    ///
    /// When a deadline is given, endpoints still outstanding at expiry
    /// are cancelled and recorded as failed; endpoints that already
    /// resolved keep their results and are persisted as usual.
    #[instrument(skip(self), level = "info")]
    pub async fn ingest_with_deadline(
        &self,
        location: &Location,
        deadline: Option<Duration>,
    ) -> Result<IngestResult, IngestError> {
        // One timestamp for the whole run so every candidate in the
        // batch shares the same ingestion time.
        let started_at = Utc::now();
        let deadline_at = deadline.map(|d| tokio::time::Instant::now() + d);

        let (current, forecast, air) = tokio::join!(
            self.fetch_endpoint(RecordKind::Current, location, started_at, deadline_at),
            self.fetch_endpoint(RecordKind::Forecast, location, started_at, deadline_at),
            self.fetch_endpoint(RecordKind::AirQuality, location, started_at, deadline_at),
        );

        let mut candidates = Vec::new();
        let mut endpoints = Vec::with_capacity(RecordKind::ALL.len());
        for (kind, outcome) in [
            (RecordKind::Current, current),
            (RecordKind::Forecast, forecast),
            (RecordKind::AirQuality, air),
        ] {
            match outcome {
                Ok(mut records) => {
                    endpoints.push(EndpointOutcome {
                        endpoint: kind,
                        status: EndpointStatus::Normalized {
                            records: records.len(),
                        },
                    });
                    candidates.append(&mut records);
                }
                Err(error) => {
                    tracing::warn!(endpoint = %kind, %error, "endpoint failed during ingest");
                    endpoints.push(EndpointOutcome {
                        endpoint: kind,
                        status: EndpointStatus::Failed { error },
                    });
                }
            }
        }

        if endpoints.iter().all(|outcome| !outcome.is_success()) {
            let failures = endpoints
                .into_iter()
                .filter_map(|outcome| match outcome.status {
                    EndpointStatus::Failed { error } => Some((outcome.endpoint, error)),
                    EndpointStatus::Normalized { .. } => None,
                })
                .collect();
            return Err(IngestError::AllEndpointsFailed(failures));
        }

        let records_written = self.repository.upsert(candidates).await?;

        tracing::info!(
            location = %location,
            records_written,
            full_success = endpoints.iter().all(EndpointOutcome::is_success),
            "ingest finished"
        );

        Ok(IngestResult {
            location: location.clone(),
            started_at,
            records_written,
            endpoints,
        })
    }

    async fn fetch_endpoint(
        &self,
        kind: RecordKind,
        location: &Location,
        started_at: DateTime<Utc>,
        deadline_at: Option<tokio::time::Instant>,
    ) -> Result<Vec<Candidate>, FetchError> {
        let fetched = match deadline_at {
            Some(at) => match tokio::time::timeout_at(at, self.client.fetch(kind, location)).await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::UpstreamUnavailable(
                    "ingest deadline elapsed".into(),
                )),
            },
            None => self.client.fetch(kind, location).await,
        };

        fetched.and_then(|payload| normalize(&payload, location, started_at))
    }
}
