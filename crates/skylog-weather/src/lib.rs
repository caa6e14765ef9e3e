//! Weather ingestion pipeline for Skylog.
//!
//! Fetches current conditions, forecast and air quality from the
//! upstream provider, normalizes them into canonical records, persists
//! them idempotently in SQLite, and assembles windowed reports from
//! whatever has been stored.

pub mod client;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod store;
pub mod types;

pub use client::{ClientConfig, OpenWeatherClient};
pub use error::{FetchError, IngestError, StoreError};
pub use normalize::normalize;
pub use pipeline::{EndpointOutcome, EndpointStatus, IngestResult, WeatherPipeline};
pub use report::ReportBuilder;
pub use store::{WeatherRepository, WeatherStore};
pub use types::{Candidate, Location, RawPayload, RecordKind, Report, WeatherRecord};
