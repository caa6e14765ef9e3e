//! Upstream API client for current conditions, the 5-day forecast, and
//! air pollution.
//!
//! The client owns the network boundary and nothing else: it validates
//! the location, geocodes it when needed, issues one call per endpoint,
//! and maps provider failures onto [`FetchError`]. It never touches
//! storage.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::instrument;

use crate::error::FetchError;
use crate::types::{
    AirQualityPayload, CurrentPayload, ForecastPayload, Location, RawPayload, RecordKind,
};

const OPENWEATHER_API_BASE: &str = "https://api.openweathermap.org";

/// Delay before the single retry of a pure network failure.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Length of one rate-budget window.
const BUDGET_WINDOW: Duration = Duration::from_secs(60);

/// Connection settings for the upstream provider, supplied once at
/// construction.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    /// Applied to every request
    pub timeout: Duration,
    /// Units parameter for the current and forecast endpoints
    pub units: String,
    /// Optional client-side budget of upstream calls per minute
    pub rate_limit_per_minute: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: OPENWEATHER_API_BASE.to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(10),
            units: "metric".to_string(),
            rate_limit_per_minute: None,
        }
    }
}

#[derive(Clone)]
pub struct OpenWeatherClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    units: String,
    /// Shared across clones so concurrent ingest calls draw from one
    /// budget
    budget: Option<Arc<RateBudget>>,
}

impl OpenWeatherClient {
    pub fn new(config: &ClientConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                FetchError::UpstreamUnavailable(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            units: config.units.clone(),
            budget: config
                .rate_limit_per_minute
                .map(|limit| Arc::new(RateBudget::new(limit))),
        })
    }

    /// Fetch one endpoint for a location.
    pub async fn fetch(
        &self,
        kind: RecordKind,
        location: &Location,
    ) -> Result<RawPayload, FetchError> {
        match kind {
            RecordKind::Current => self
                .current_weather(location)
                .await
                .map(RawPayload::Current),
            RecordKind::Forecast => self.forecast(location).await.map(RawPayload::Forecast),
            RecordKind::AirQuality => self
                .air_pollution(location)
                .await
                .map(RawPayload::AirQuality),
        }
    }

    /// Current conditions.
    #[instrument(skip(self), level = "info")]
    pub async fn current_weather(&self, location: &Location) -> Result<CurrentPayload, FetchError> {
        let (lat, lon) = self.resolve_coordinates(location).await?;
        let url = format!(
            "{}/data/2.5/weather?lat={lat}&lon={lon}&units={}&appid={}",
            self.base_url, self.units, self.api_key
        );
        self.get_json(&url).await
    }

    /// Five-day forecast in three-hour steps.
    #[instrument(skip(self), level = "info")]
    pub async fn forecast(&self, location: &Location) -> Result<ForecastPayload, FetchError> {
        let (lat, lon) = self.resolve_coordinates(location).await?;
        let url = format!(
            "{}/data/2.5/forecast?lat={lat}&lon={lon}&units={}&appid={}",
            self.base_url, self.units, self.api_key
        );
        self.get_json(&url).await
    }

    /// Air pollution readings. The endpoint takes no units parameter.
    #[instrument(skip(self), level = "info")]
    pub async fn air_pollution(
        &self,
        location: &Location,
    ) -> Result<AirQualityPayload, FetchError> {
        let (lat, lon) = self.resolve_coordinates(location).await?;
        let url = format!(
            "{}/data/2.5/air_pollution?lat={lat}&lon={lon}&appid={}",
            self.base_url, self.api_key
        );
        self.get_json(&url).await
    }

    /// Resolve a location to coordinates, geocoding the city and country
    /// pair when no coordinates are attached. An empty geocoder result is
    /// a provider verdict, not a transport failure.
    pub async fn resolve_coordinates(&self, location: &Location) -> Result<(f64, f64), FetchError> {
        location.validate()?;

        if let (Some(lat), Some(lon)) = (location.latitude, location.longitude) {
            return Ok((lat, lon));
        }

        let query = format!("{},{}", location.city.trim(), location.country.trim());
        let url = format!(
            "{}/geo/1.0/direct?q={}&limit=1&appid={}",
            self.base_url,
            urlencoding::encode(&query),
            self.api_key
        );

        let entries: Vec<GeoEntry> = self.get_json(&url).await?;
        let entry = entries
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::LocationNotFound(location.display_name()))?;

        if !(-90.0..=90.0).contains(&entry.lat) || !(-180.0..=180.0).contains(&entry.lon) {
            return Err(FetchError::MalformedPayload(format!(
                "geocoder returned out-of-range coordinates ({}, {})",
                entry.lat, entry.lon
            )));
        }

        tracing::debug!(lat = entry.lat, lon = entry.lon, "geocoded {location}");
        Ok((entry.lat, entry.lon))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        if let Some(budget) = &self.budget {
            budget.acquire()?;
        }
        let response = self.send_with_retry(url).await?;
        self.handle_response(response).await
    }

    /// One retry for pure network failures with a short fixed backoff.
    /// Provider verdicts are terminal per call and never retried here.
    async fn send_with_retry(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        match self.client.get(url).send().await {
            Ok(response) => Ok(response),
            Err(err) if err.is_timeout() || err.is_connect() => {
                tracing::debug!("retrying after network failure: {err}");
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.client
                    .get(url)
                    .send()
                    .await
                    .map_err(FetchError::from_reqwest)
            }
            Err(err) => Err(FetchError::from_reqwest(err)),
        }
    }

    /// Helper to map provider responses onto the error taxonomy.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, FetchError> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| FetchError::MalformedPayload(format!("JSON parse error: {e}")))
        } else if status.as_u16() == 401 {
            Err(FetchError::InvalidApiKey)
        } else if status.as_u16() == 404 {
            let text = response.text().await.unwrap_or_default();
            Err(FetchError::LocationNotFound(text))
        } else if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            Err(FetchError::RateLimited { retry_after })
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(FetchError::UpstreamUnavailable(format!("{status}: {text}")))
        }
    }
}

/// Fixed-window call counter shared by every clone of a client. Exhaustion
/// surfaces as `RateLimited` with the window remainder as the hint.
#[derive(Debug)]
struct RateBudget {
    limit: u32,
    window: Mutex<BudgetWindow>,
}

#[derive(Debug)]
struct BudgetWindow {
    started: Instant,
    used: u32,
}

impl RateBudget {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            window: Mutex::new(BudgetWindow {
                started: Instant::now(),
                used: 0,
            }),
        }
    }

    fn acquire(&self) -> Result<(), FetchError> {
        let mut window = self.window.lock();
        if window.started.elapsed() >= BUDGET_WINDOW {
            window.started = Instant::now();
            window.used = 0;
        }
        if window.used >= self.limit {
            let remaining = BUDGET_WINDOW.saturating_sub(window.started.elapsed());
            return Err(FetchError::RateLimited {
                retry_after: Some(remaining.as_secs().max(1)),
            });
        }
        window.used += 1;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct GeoEntry {
    lat: f64,
    lon: f64,
}
