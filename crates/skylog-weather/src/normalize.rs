//! Turns raw endpoint payloads into canonical candidate records.
//!
//! Pure functions over the payload types: no I/O and no shared state.
//! Each payload either yields its full candidate set or fails with
//! `MalformedPayload` — there is no partial emission.

use chrono::{DateTime, Utc};

use crate::error::FetchError;
use crate::types::{
    AirQualityPayload, Candidate, Coord, CurrentPayload, ForecastPayload, Location, RawPayload,
    RecordKind,
};

/// Normalize one endpoint payload into candidate records for `location`.
///
/// `ingested_at` is the single timestamp of the ingest call; forecast
/// horizons are measured from it.
pub fn normalize(
    payload: &RawPayload,
    location: &Location,
    ingested_at: DateTime<Utc>,
) -> Result<Vec<Candidate>, FetchError> {
    match payload {
        RawPayload::Current(p) => normalize_current(p, location),
        RawPayload::Forecast(p) => normalize_forecast(p, location, ingested_at),
        RawPayload::AirQuality(p) => normalize_air_quality(p, location),
    }
}

fn normalize_current(
    payload: &CurrentPayload,
    location: &Location,
) -> Result<Vec<Candidate>, FetchError> {
    // A current observation with no place reference at all is unusable.
    if payload.name.is_none() && payload.coord.is_none() {
        return Err(FetchError::MalformedPayload(
            "current weather payload carries no location reference".into(),
        ));
    }

    let observed_at = observation_time(payload.dt, "current weather payload")?;
    let location = enriched_location(location, payload.coord.as_ref());
    let condition = payload.weather.first();

    Ok(vec![Candidate {
        location,
        kind: RecordKind::Current,
        observed_at,
        horizon_secs: None,
        temperature: payload.main.as_ref().and_then(|m| m.temp),
        feels_like: payload.main.as_ref().and_then(|m| m.feels_like),
        humidity: payload.main.as_ref().and_then(|m| m.humidity),
        pressure: payload.main.as_ref().and_then(|m| m.pressure),
        wind_speed: payload.wind.as_ref().and_then(|w| w.speed),
        condition_code: condition.and_then(|c| c.id),
        condition: condition.and_then(|c| c.description.clone()),
        aqi: None,
        pollutants: None,
    }])
}

fn normalize_forecast(
    payload: &ForecastPayload,
    location: &Location,
    ingested_at: DateTime<Utc>,
) -> Result<Vec<Candidate>, FetchError> {
    let entries = payload
        .list
        .as_ref()
        .ok_or_else(|| FetchError::MalformedPayload("forecast payload missing entry list".into()))?;

    let location = enriched_location(
        location,
        payload.city.as_ref().and_then(|c| c.coord.as_ref()),
    );

    let mut candidates = Vec::with_capacity(entries.len());
    for entry in entries {
        let observed_at = observation_time(entry.dt, "forecast entry")?;

        // Entries at or before ingestion are stale, not malformed.
        if observed_at <= ingested_at {
            tracing::debug!(%observed_at, "dropping stale forecast entry");
            continue;
        }

        let condition = entry.weather.first();
        candidates.push(Candidate {
            location: location.clone(),
            kind: RecordKind::Forecast,
            observed_at,
            horizon_secs: Some((observed_at - ingested_at).num_seconds()),
            temperature: entry.main.as_ref().and_then(|m| m.temp),
            feels_like: entry.main.as_ref().and_then(|m| m.feels_like),
            humidity: entry.main.as_ref().and_then(|m| m.humidity),
            pressure: entry.main.as_ref().and_then(|m| m.pressure),
            wind_speed: entry.wind.as_ref().and_then(|w| w.speed),
            condition_code: condition.and_then(|c| c.id),
            condition: condition.and_then(|c| c.description.clone()),
            aqi: None,
            pollutants: None,
        });
    }

    Ok(candidates)
}

fn normalize_air_quality(
    payload: &AirQualityPayload,
    location: &Location,
) -> Result<Vec<Candidate>, FetchError> {
    let samples = payload.list.as_ref().ok_or_else(|| {
        FetchError::MalformedPayload("air pollution payload missing sample list".into())
    })?;

    let location = enriched_location(location, payload.coord.as_ref());

    let mut candidates = Vec::with_capacity(samples.len());
    for sample in samples {
        let observed_at = observation_time(sample.dt, "air pollution sample")?;
        candidates.push(Candidate {
            location: location.clone(),
            kind: RecordKind::AirQuality,
            observed_at,
            horizon_secs: None,
            temperature: None,
            feels_like: None,
            humidity: None,
            pressure: None,
            wind_speed: None,
            condition_code: None,
            condition: None,
            aqi: sample.main.as_ref().and_then(|m| m.aqi),
            pollutants: sample.components.clone(),
        });
    }

    Ok(candidates)
}

/// Keep the caller's location but adopt upstream coordinates when the
/// caller had none.
fn enriched_location(location: &Location, coord: Option<&Coord>) -> Location {
    let mut location = location.clone();
    if !location.has_coordinates() {
        if let Some(coord) = coord {
            location.latitude = Some(coord.lat);
            location.longitude = Some(coord.lon);
        }
    }
    location
}

fn observation_time(dt: Option<i64>, what: &str) -> Result<DateTime<Utc>, FetchError> {
    let secs = dt.ok_or_else(|| {
        FetchError::MalformedPayload(format!("{what} missing observation timestamp"))
    })?;
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        FetchError::MalformedPayload(format!("{what} has out-of-range timestamp: {secs}"))
    })
}
