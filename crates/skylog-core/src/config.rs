use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Upstream weather provider settings
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Local storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Report assembly settings
    #[serde(default)]
    pub report: ReportConfig,

    /// Ingest orchestration settings
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the upstream weather API
    pub base_url: String,

    /// API key; when empty, `Config::load` falls back to the
    /// OPENWEATHER_API_KEY environment variable
    #[serde(default)]
    pub api_key: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Measurement units passed through to the provider
    #[serde(default = "default_units")]
    pub units: String,

    /// Optional client-side call budget per minute
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_units() -> String {
    "metric".to_string()
}

impl UpstreamConfig {
    /// Check if an API key is present
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openweathermap.org".to_string(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
            units: default_units(),
            rate_limit_per_minute: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_storage_path_str")]
    pub path: String,
}

fn default_storage_path_str() -> String {
    default_storage_path().to_string_lossy().into_owned()
}

fn default_storage_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("skylog").join("weather.db"))
        .unwrap_or_else(|| PathBuf::from("weather.db"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path_str(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Forecast window in hours (entries further out are left off reports)
    #[serde(default = "default_forecast_window_hours")]
    pub forecast_window_hours: u32,
}

fn default_forecast_window_hours() -> u32 {
    48
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            forecast_window_hours: default_forecast_window_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Overall deadline for one ingest call in seconds; 0 disables it
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_deadline_secs() -> u64 {
    30
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(Self::with_env_fallback(config));
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(Self::with_env_fallback(config))
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        if !validation.warnings.is_empty() {
            for warning in &validation.warnings {
                tracing::warn!("Config warning: {}", warning);
            }
        }

        Ok((config, validation))
    }

    /// Fill the API key from the environment when the file left it empty.
    /// The key is never written back to disk.
    fn with_env_fallback(mut config: Self) -> Self {
        if config.upstream.api_key.is_empty() {
            if let Ok(key) = std::env::var("OPENWEATHER_API_KEY") {
                config.upstream.api_key = key;
            }
        }
        config
    }

    /// Validate the configuration
    ///
    /// Returns a ValidationResult containing any errors or warnings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        // Validate upstream base URL
        self.validate_url(&self.upstream.base_url, "upstream.base_url", &mut result);

        // Validate request timeout
        if self.upstream.timeout_secs == 0 {
            result.add_error("upstream.timeout_secs", "Timeout must be greater than 0");
        } else if self.upstream.timeout_secs > 300 {
            result.add_warning(
                "upstream.timeout_secs",
                "Timeout is unusually large (>300 seconds)",
            );
        }

        // Validate units (provider-owned vocabulary, so only warn)
        if !matches!(self.upstream.units.as_str(), "standard" | "metric" | "imperial") {
            result.add_warning(
                "upstream.units",
                format!("Unrecognized units value: {}", self.upstream.units),
            );
        }

        // Missing API key is a warning: commands that never reach the
        // upstream (report) still work without one
        if !self.upstream.is_configured() {
            result.add_warning(
                "upstream.api_key",
                "No API key configured - upstream requests will be rejected",
            );
        }

        if self.upstream.rate_limit_per_minute == Some(0) {
            result.add_error(
                "upstream.rate_limit_per_minute",
                "A rate limit of 0 blocks every request",
            );
        }

        // Validate storage path
        if self.storage.path.is_empty() {
            result.add_error("storage.path", "Storage path must not be empty");
        }

        // Validate report window
        if self.report.forecast_window_hours == 0 {
            result.add_warning(
                "report.forecast_window_hours",
                "Forecast window of 0 hours hides all forecast entries",
            );
        } else if self.report.forecast_window_hours > 120 {
            result.add_warning(
                "report.forecast_window_hours",
                "Forecast window exceeds the provider's 5-day range",
            );
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                // Check scheme
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                // Check host
                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                // Validate port if explicitly specified
                if let Some(port) = url.port() {
                    if port == 0 {
                        result.add_error(field_name, "Port cannot be 0");
                    }
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        // Ensure config directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("skylog");

        Ok(config_dir.join("config.toml"))
    }
}
