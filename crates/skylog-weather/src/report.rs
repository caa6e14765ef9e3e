//! On-demand report assembly from persisted records.
//!
//! Reports are read-only views over the store; building one never
//! touches the network, so it keeps working while the upstream is down.

use chrono::{Duration, Utc};
use tracing::instrument;

use crate::error::StoreError;
use crate::store::WeatherRepository;
use crate::types::{Location, RecordKind, Report};

/// Assembles reports from whatever the store currently holds.
#[derive(Clone)]
pub struct ReportBuilder {
    repository: WeatherRepository,
}

impl ReportBuilder {
    pub fn new(repository: WeatherRepository) -> Self {
        Self { repository }
    }

    /// Build a report for a location, limiting forecast points to the
    /// given horizon window.
    ///
    /// Returns `Ok(None)` when the store holds no current conditions
    /// for the location. Missing forecast or air quality data degrades
    /// the report (empty list, absent section) instead of failing it.
    #[instrument(skip(self), level = "info")]
    pub async fn build(
        &self,
        location: &Location,
        forecast_window: Duration,
    ) -> Result<Option<Report>, StoreError> {
        let Some(current) = self.repository.latest(location, RecordKind::Current).await? else {
            tracing::debug!(location = %location, "no current conditions stored");
            return Ok(None);
        };

        let window_secs = forecast_window.num_seconds();
        let forecast: Vec<_> = self
            .repository
            .query(location, RecordKind::Forecast, None)
            .await?
            .into_iter()
            .filter(|record| record.horizon_secs.is_some_and(|h| h <= window_secs))
            .collect();

        let air_quality = self
            .repository
            .latest(location, RecordKind::AirQuality)
            .await?;

        Ok(Some(Report {
            location: current.location.clone(),
            current,
            forecast,
            air_quality,
            generated_at: Utc::now(),
        }))
    }
}
