use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use skylog_core::Config;
use skylog_weather::{
    ClientConfig, EndpointStatus, IngestResult, Location, OpenWeatherClient, ReportBuilder,
    WeatherPipeline, WeatherRepository,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "skylog", version, about = "Weather ingestion and reporting")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch, normalize and persist all upstream endpoints for a location.
    Ingest {
        /// Location as "City,CC", e.g. "Rome,IT".
        location: String,

        /// Give up on endpoints still outstanding after this many
        /// seconds (0 disables the deadline).
        #[arg(long)]
        deadline_secs: Option<u64>,
    },

    /// Assemble a report for a location from stored records.
    Report {
        /// Location as "City,CC", e.g. "Rome,IT".
        location: String,

        /// Forecast window in hours.
        #[arg(long)]
        window_hours: Option<u32>,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let (config, _) = Config::load_validated().context("failed to load configuration")?;

        match self.command {
            Command::Ingest {
                location,
                deadline_secs,
            } => {
                if !config.upstream.is_configured() {
                    bail!(
                        "no API key configured; set OPENWEATHER_API_KEY or add one to the config file"
                    );
                }
                let location = Location::parse(&location)?;

                let client_config = ClientConfig {
                    base_url: config.upstream.base_url.clone(),
                    api_key: config.upstream.api_key.clone(),
                    timeout: Duration::from_secs(config.upstream.timeout_secs),
                    units: config.upstream.units.clone(),
                    rate_limit_per_minute: config.upstream.rate_limit_per_minute,
                };
                let client = OpenWeatherClient::new(&client_config)?;
                let repository = WeatherRepository::open(&config.storage.path)?;
                let pipeline = WeatherPipeline::new(client, repository);

                let secs = deadline_secs.unwrap_or(config.ingest.deadline_secs);
                let deadline = (secs > 0).then(|| Duration::from_secs(secs));

                let result = pipeline.ingest_with_deadline(&location, deadline).await?;
                print_ingest_result(&result);
            }
            Command::Report {
                location,
                window_hours,
            } => {
                let location = Location::parse(&location)?;
                let repository = WeatherRepository::open(&config.storage.path)?;
                let builder = ReportBuilder::new(repository);

                let hours = window_hours.unwrap_or(config.report.forecast_window_hours);
                let window = chrono::Duration::hours(i64::from(hours));

                match builder.build(&location, window).await? {
                    Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                    None => bail!(
                        "no stored weather for {location}; run `skylog ingest {location}` first"
                    ),
                }
            }
        }

        Ok(())
    }
}

fn print_ingest_result(result: &IngestResult) {
    for outcome in &result.endpoints {
        match &outcome.status {
            EndpointStatus::Normalized { records } => {
                println!("{:<12} ok, {records} record(s)", outcome.endpoint.as_str());
            }
            EndpointStatus::Failed { error } => {
                println!("{:<12} failed: {error}", outcome.endpoint.as_str());
            }
        }
    }
    println!(
        "wrote {} record(s) for {}",
        result.records_written, result.location
    );
}
