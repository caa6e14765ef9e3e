//! Canonical data types for the weather pipeline, plus the raw payload
//! shapes the upstream provider returns.
//!
//! Raw payloads are deliberately loose: every field the provider could
//! omit is an `Option`, and unknown fields are ignored. The strict shape
//! lives in [`Candidate`] and [`WeatherRecord`], produced by the
//! normalizer.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Coordinates closer than this are treated as the same place.
pub const COORD_EPSILON: f64 = 0.01;

/// A named place that all stored records are keyed by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub city: String,
    /// Two-letter ISO country code
    pub country: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Location {
    pub fn new(city: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            country: country.into(),
            latitude: None,
            longitude: None,
        }
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    /// Parse a `"City,CC"` pair such as `"Rome,IT"`.
    pub fn parse(input: &str) -> Result<Self, FetchError> {
        let (city, country) = input.split_once(',').ok_or_else(|| {
            FetchError::InvalidLocation(format!(
                "expected \"City,CC\" (e.g. \"Rome,IT\"), got {input:?}"
            ))
        })?;
        let location = Self::new(city.trim(), country.trim());
        location.validate()?;
        Ok(location)
    }

    /// Check that this location can be sent upstream: a non-empty city, a
    /// two-letter country code, and in-range coordinates when present.
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.city.trim().is_empty() {
            return Err(FetchError::InvalidLocation("city must not be empty".into()));
        }
        if self.country.len() != 2 || !self.country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(FetchError::InvalidLocation(format!(
                "country must be a two-letter ISO code, got {:?}",
                self.country
            )));
        }
        if let Some(lat) = self.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(FetchError::InvalidLocation(format!(
                    "latitude out of range: {lat}"
                )));
            }
        }
        if let Some(lon) = self.longitude {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(FetchError::InvalidLocation(format!(
                    "longitude out of range: {lon}"
                )));
            }
        }
        Ok(())
    }

    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// Case-folded key used for storage lookups, e.g. `"rome,it"`.
    pub fn storage_key(&self) -> String {
        format!(
            "{},{}",
            self.city.trim().to_lowercase(),
            self.country.trim().to_lowercase()
        )
    }

    /// Canonical display form, e.g. `"Rome,IT"`.
    pub fn display_name(&self) -> String {
        format!("{},{}", self.city.trim(), self.country.trim().to_uppercase())
    }
}

impl PartialEq for Location {
    /// Equal when city and country match case-insensitively, or when both
    /// sides carry coordinates within [`COORD_EPSILON`] of each other.
    fn eq(&self, other: &Self) -> bool {
        if self.city.trim().eq_ignore_ascii_case(other.city.trim())
            && self.country.trim().eq_ignore_ascii_case(other.country.trim())
        {
            return true;
        }
        match (self.latitude, self.longitude, other.latitude, other.longitude) {
            (Some(lat_a), Some(lon_a), Some(lat_b), Some(lon_b)) => {
                (lat_a - lat_b).abs() < COORD_EPSILON && (lon_a - lon_b).abs() < COORD_EPSILON
            }
            _ => false,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// What a record represents; also selects the upstream endpoint that
/// produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Current,
    Forecast,
    AirQuality,
}

impl RecordKind {
    /// The three kinds in fetch order.
    pub const ALL: [RecordKind; 3] = [
        RecordKind::Current,
        RecordKind::Forecast,
        RecordKind::AirQuality,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Current => "current",
            RecordKind::Forecast => "forecast",
            RecordKind::AirQuality => "air_quality",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "current" => Some(RecordKind::Current),
            "forecast" => Some(RecordKind::Forecast),
            "air_quality" => Some(RecordKind::AirQuality),
            _ => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized observation that has not been persisted yet.
///
/// The repository turns candidates into [`WeatherRecord`]s by stamping
/// `ingested_at` on write.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub location: Location,
    pub kind: RecordKind,
    /// Upstream-reported observation time, not ingestion time
    pub observed_at: DateTime<Utc>,
    /// Whole seconds between ingestion and the forecasted observation;
    /// only forecast candidates carry one
    pub horizon_secs: Option<i64>,
    pub temperature: Option<f64>,
    pub feels_like: Option<f64>,
    pub humidity: Option<u8>,
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    pub condition_code: Option<i64>,
    pub condition: Option<String>,
    /// Provider air-quality index, 1 (good) to 5 (very poor)
    pub aqi: Option<u8>,
    pub pollutants: Option<BTreeMap<String, f64>>,
}

impl Candidate {
    pub fn horizon(&self) -> Option<Duration> {
        self.horizon_secs.map(Duration::seconds)
    }
}

/// One persisted observation row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub location: Location,
    pub kind: RecordKind,
    pub observed_at: DateTime<Utc>,
    pub horizon_secs: Option<i64>,
    pub temperature: Option<f64>,
    pub feels_like: Option<f64>,
    pub humidity: Option<u8>,
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    pub condition_code: Option<i64>,
    pub condition: Option<String>,
    pub aqi: Option<u8>,
    pub pollutants: Option<BTreeMap<String, f64>>,
    /// Stamped by the repository on write
    pub ingested_at: DateTime<Utc>,
}

impl WeatherRecord {
    pub fn horizon(&self) -> Option<Duration> {
        self.horizon_secs.map(Duration::seconds)
    }
}

/// Aggregated view over stored history for one location. Never persisted;
/// assembled fresh per request.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub location: Location,
    pub current: WeatherRecord,
    /// Ascending by observed time, limited to the requested window
    pub forecast: Vec<WeatherRecord>,
    pub air_quality: Option<WeatherRecord>,
    pub generated_at: DateTime<Utc>,
}

/// Raw payload from one upstream endpoint, still in provider shape.
#[derive(Debug, Clone)]
pub enum RawPayload {
    Current(CurrentPayload),
    Forecast(ForecastPayload),
    AirQuality(AirQualityPayload),
}

impl RawPayload {
    pub fn kind(&self) -> RecordKind {
        match self {
            RawPayload::Current(_) => RecordKind::Current,
            RawPayload::Forecast(_) => RecordKind::Forecast,
            RawPayload::AirQuality(_) => RecordKind::AirQuality,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

/// One entry of the provider's `weather` array.
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionEntry {
    pub id: Option<i64>,
    pub description: Option<String>,
}

/// The provider's `main` block, shared by current and forecast entries.
#[derive(Debug, Clone, Deserialize)]
pub struct MainReadings {
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    pub humidity: Option<u8>,
    pub pressure: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindReadings {
    pub speed: Option<f64>,
}

/// `GET /data/2.5/weather` response.
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentPayload {
    pub coord: Option<Coord>,
    #[serde(default)]
    pub weather: Vec<ConditionEntry>,
    pub main: Option<MainReadings>,
    pub wind: Option<WindReadings>,
    pub dt: Option<i64>,
    pub name: Option<String>,
}

/// `GET /data/2.5/forecast` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastPayload {
    pub list: Option<Vec<ForecastEntry>>,
    pub city: Option<ForecastCity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastEntry {
    pub dt: Option<i64>,
    pub main: Option<MainReadings>,
    #[serde(default)]
    pub weather: Vec<ConditionEntry>,
    pub wind: Option<WindReadings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastCity {
    pub name: Option<String>,
    pub country: Option<String>,
    pub coord: Option<Coord>,
}

/// `GET /data/2.5/air_pollution` response.
#[derive(Debug, Clone, Deserialize)]
pub struct AirQualityPayload {
    pub coord: Option<Coord>,
    pub list: Option<Vec<AirQualitySample>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AirQualitySample {
    pub dt: Option<i64>,
    pub main: Option<AqiReading>,
    pub components: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AqiReading {
    pub aqi: Option<u8>,
}
