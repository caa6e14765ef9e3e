//! Integration tests for the full ingest and report flow using wiremock.
//!
//! These tests run the pipeline against a mock upstream and a real
//! SQLite file, then read the results back through the report builder.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use skylog_weather::{
    ClientConfig, EndpointStatus, FetchError, IngestError, Location, OpenWeatherClient,
    RecordKind, ReportBuilder, WeatherPipeline, WeatherRepository,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn rome() -> Location {
    Location::new("Rome", "IT").with_coordinates(41.89, 12.48)
}

fn test_pipeline(
    server: &MockServer,
    dir: &TempDir,
) -> (WeatherPipeline, ReportBuilder, WeatherRepository) {
    let config = ClientConfig {
        base_url: server.uri(),
        api_key: "test-key".into(),
        ..ClientConfig::default()
    };
    let client = OpenWeatherClient::new(&config).unwrap();
    let repository = WeatherRepository::open(dir.path().join("weather.db")).unwrap();
    (
        WeatherPipeline::new(client, repository.clone()),
        ReportBuilder::new(repository.clone()),
        repository,
    )
}

fn current_body(temp: f64, dt: i64) -> serde_json::Value {
    json!({
        "coord": {"lat": 41.89, "lon": 12.48},
        "weather": [{"id": 800, "description": "clear sky"}],
        "main": {"temp": temp, "feels_like": temp - 0.7, "humidity": 54, "pressure": 1018.0},
        "wind": {"speed": 3.6},
        "dt": dt,
        "name": "Rome"
    })
}

fn forecast_body(hours_ahead: &[i64]) -> serde_json::Value {
    let list: Vec<_> = hours_ahead
        .iter()
        .map(|h| {
            json!({
                "dt": (Utc::now() + chrono::Duration::hours(*h)).timestamp(),
                "main": {"temp": 16.0, "feels_like": 15.1, "humidity": 60, "pressure": 1015.0},
                "weather": [{"id": 801, "description": "few clouds"}],
                "wind": {"speed": 2.1}
            })
        })
        .collect();
    json!({
        "city": {"name": "Rome", "country": "IT", "coord": {"lat": 41.89, "lon": 12.48}},
        "list": list
    })
}

fn air_body(aqi: u8, dt: i64) -> serde_json::Value {
    json!({
        "coord": {"lat": 41.89, "lon": 12.48},
        "list": [{
            "dt": dt,
            "main": {"aqi": aqi},
            "components": {"co": 201.94, "no2": 1.71, "pm2_5": 0.5}
        }]
    })
}

async fn mount(server: &MockServer, endpoint_path: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(endpoint_path))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn mount_healthy_upstream(server: &MockServer) {
    mount(
        server,
        "/data/2.5/weather",
        ResponseTemplate::new(200).set_body_json(current_body(18.5, Utc::now().timestamp() - 120)),
    )
    .await;
    mount(
        server,
        "/data/2.5/forecast",
        ResponseTemplate::new(200).set_body_json(forecast_body(&[3, 24, 47])),
    )
    .await;
    mount(
        server,
        "/data/2.5/air_pollution",
        ResponseTemplate::new(200).set_body_json(air_body(2, Utc::now().timestamp() - 120)),
    )
    .await;
}

#[tokio::test]
async fn test_named_location_ingest_then_report() {
    let server = MockServer::start().await;

    // A name-only location goes through geocoding first.
    Mock::given(method("GET"))
        .and(path("/geo/1.0/direct"))
        .and(query_param("q", "Rome,IT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"name": "Rome", "lat": 41.89, "lon": 12.48, "country": "IT"}
        ])))
        .mount(&server)
        .await;
    mount_healthy_upstream(&server).await;

    let dir = TempDir::new().unwrap();
    let (pipeline, builder, _) = test_pipeline(&server, &dir);

    let location = Location::parse("Rome,IT").unwrap();
    let result = pipeline.ingest(&location).await.unwrap();

    assert!(result.is_full_success());
    assert_eq!(result.records_written, 5);

    let report = builder
        .build(&location, chrono::Duration::hours(48))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.current.temperature, Some(18.5));
    assert_eq!(report.current.condition.as_deref(), Some("clear sky"));
    assert_eq!(report.forecast.len(), 3);
    assert!(report
        .forecast
        .windows(2)
        .all(|w| w[0].observed_at < w[1].observed_at));
    let air = report.air_quality.unwrap();
    assert_eq!(air.aqi, Some(2));
    assert_eq!(air.pollutants.unwrap().get("co"), Some(&201.94));
}

#[tokio::test]
async fn test_partial_success_keeps_resolved_endpoints() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/data/2.5/weather",
        ResponseTemplate::new(200).set_body_json(current_body(18.5, Utc::now().timestamp() - 60)),
    )
    .await;
    mount(&server, "/data/2.5/forecast", ResponseTemplate::new(500)).await;
    mount(&server, "/data/2.5/air_pollution", ResponseTemplate::new(503)).await;

    let dir = TempDir::new().unwrap();
    let (pipeline, builder, repository) = test_pipeline(&server, &dir);

    let result = pipeline.ingest(&rome()).await.unwrap();
    assert!(result.is_partial());
    assert_eq!(result.records_written, 1);
    assert_eq!(repository.count().await.unwrap(), 1);

    // The report degrades to what was stored rather than failing.
    let report = builder
        .build(&rome(), chrono::Duration::hours(48))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.current.temperature, Some(18.5));
    assert!(report.forecast.is_empty());
    assert!(report.air_quality.is_none());
}

#[tokio::test]
async fn test_all_endpoints_failed_is_a_total_failure() {
    let server = MockServer::start().await;
    for endpoint_path in [
        "/data/2.5/weather",
        "/data/2.5/forecast",
        "/data/2.5/air_pollution",
    ] {
        mount(&server, endpoint_path, ResponseTemplate::new(500)).await;
    }

    let dir = TempDir::new().unwrap();
    let (pipeline, builder, repository) = test_pipeline(&server, &dir);

    let err = pipeline.ingest(&rome()).await.unwrap_err();
    match err {
        IngestError::AllEndpointsFailed(failures) => assert_eq!(failures.len(), 3),
        other => panic!("expected AllEndpointsFailed, got {other:?}"),
    }

    assert_eq!(repository.count().await.unwrap(), 0);
    let report = builder
        .build(&rome(), chrono::Duration::hours(48))
        .await
        .unwrap();
    assert!(report.is_none());
}

#[tokio::test]
async fn test_reingest_overwrites_instead_of_duplicating() {
    let server = MockServer::start().await;
    let observed_at = 1_700_000_000_i64;

    mount(
        &server,
        "/data/2.5/weather",
        ResponseTemplate::new(200).set_body_json(current_body(18.5, observed_at)),
    )
    .await;
    mount(
        &server,
        "/data/2.5/forecast",
        ResponseTemplate::new(200).set_body_json(forecast_body(&[3, 24])),
    )
    .await;
    mount(
        &server,
        "/data/2.5/air_pollution",
        ResponseTemplate::new(200).set_body_json(air_body(3, observed_at)),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let (pipeline, _, repository) = test_pipeline(&server, &dir);
    pipeline.ingest(&rome()).await.unwrap();

    // Same observation timestamps again, fresher readings.
    server.reset().await;
    mount(
        &server,
        "/data/2.5/weather",
        ResponseTemplate::new(200).set_body_json(current_body(21.0, observed_at)),
    )
    .await;
    mount(
        &server,
        "/data/2.5/forecast",
        ResponseTemplate::new(200).set_body_json(forecast_body(&[3, 24])),
    )
    .await;
    mount(
        &server,
        "/data/2.5/air_pollution",
        ResponseTemplate::new(200).set_body_json(air_body(1, observed_at)),
    )
    .await;
    pipeline.ingest(&rome()).await.unwrap();

    let current_rows = repository
        .query(&rome(), RecordKind::Current, None)
        .await
        .unwrap();
    assert_eq!(current_rows.len(), 1);
    assert_eq!(current_rows[0].temperature, Some(21.0));

    let air_rows = repository
        .query(&rome(), RecordKind::AirQuality, None)
        .await
        .unwrap();
    assert_eq!(air_rows.len(), 1);
    assert_eq!(air_rows[0].aqi, Some(1));
}

#[tokio::test]
async fn test_deadline_cancels_stragglers_and_keeps_the_rest() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/data/2.5/weather",
        ResponseTemplate::new(200).set_body_json(current_body(18.5, Utc::now().timestamp() - 60)),
    )
    .await;
    mount(
        &server,
        "/data/2.5/forecast",
        ResponseTemplate::new(200)
            .set_body_json(forecast_body(&[3, 24]))
            .set_delay(Duration::from_millis(2_000)),
    )
    .await;
    mount(
        &server,
        "/data/2.5/air_pollution",
        ResponseTemplate::new(200)
            .set_body_json(air_body(2, Utc::now().timestamp() - 60)),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let (pipeline, builder, repository) = test_pipeline(&server, &dir);

    let result = pipeline
        .ingest_with_deadline(&rome(), Some(Duration::from_millis(250)))
        .await
        .unwrap();

    assert!(result.is_partial());
    assert_eq!(repository.count().await.unwrap(), 2);

    let forecast_outcome = result
        .endpoints
        .iter()
        .find(|o| o.endpoint == RecordKind::Forecast)
        .unwrap();
    match &forecast_outcome.status {
        EndpointStatus::Failed {
            error: FetchError::UpstreamUnavailable(reason),
        } => assert!(reason.contains("deadline"), "unexpected reason: {reason}"),
        other => panic!("expected a deadline failure, got {other:?}"),
    }

    let report = builder
        .build(&rome(), chrono::Duration::hours(48))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.current.temperature, Some(18.5));
    assert!(report.forecast.is_empty());
    assert_eq!(report.air_quality.unwrap().aqi, Some(2));
}

#[tokio::test]
async fn test_invalid_api_key_fails_every_endpoint() {
    let server = MockServer::start().await;
    for endpoint_path in [
        "/data/2.5/weather",
        "/data/2.5/forecast",
        "/data/2.5/air_pollution",
    ] {
        mount(&server, endpoint_path, ResponseTemplate::new(401)).await;
    }

    let dir = TempDir::new().unwrap();
    let (pipeline, _, _) = test_pipeline(&server, &dir);

    let err = pipeline.ingest(&rome()).await.unwrap_err();
    match err {
        IngestError::AllEndpointsFailed(failures) => {
            assert!(failures
                .iter()
                .all(|(_, e)| matches!(e, FetchError::InvalidApiKey)));
        }
        other => panic!("expected AllEndpointsFailed, got {other:?}"),
    }
}

/// Serves a different coherent (temperature, condition) pair on every
/// hit so interleaved writers are detectable.
struct VersionedCurrent {
    hits: AtomicUsize,
}

impl Respond for VersionedCurrent {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let version = self.hits.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(200).set_body_json(json!({
            "coord": {"lat": 41.89, "lon": 12.48},
            "weather": [{"id": 800, "description": format!("version {version}")}],
            "main": {"temp": 10.0 + version as f64, "feels_like": 9.0, "humidity": 50, "pressure": 1010.0},
            "wind": {"speed": 1.0},
            "dt": 1_700_000_000,
            "name": "Rome"
        }))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingests_store_one_coherent_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .respond_with(VersionedCurrent {
            hits: AtomicUsize::new(0),
        })
        .mount(&server)
        .await;
    mount(&server, "/data/2.5/forecast", ResponseTemplate::new(500)).await;
    mount(&server, "/data/2.5/air_pollution", ResponseTemplate::new(500)).await;

    let dir = TempDir::new().unwrap();
    let (pipeline, _, repository) = test_pipeline(&server, &dir);

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let pipeline = pipeline.clone();
        tasks.push(tokio::spawn(async move {
            pipeline.ingest(&rome()).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // All writers targeted the same key, so exactly one row survives,
    // and its fields must all come from the same writer.
    let rows = repository
        .query(&rome(), RecordKind::Current, None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    let version = (rows[0].temperature.unwrap() - 10.0) as i64;
    assert!((0..6).contains(&version));
    assert_eq!(
        rows[0].condition.as_deref(),
        Some(format!("version {version}").as_str())
    );
}
