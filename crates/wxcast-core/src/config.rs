use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;
use wxcast_predict::archive::{DEFAULT_ARCHIVE_BASE_URL, DEFAULT_TIMEOUT_SECS, DEFAULT_WINDOW_DAYS};
use wxcast_predict::store::DEFAULT_MAX_MODEL_AGE_DAYS;
use wxcast_predict::{ArchiveConfig, Location, PredictorConfig, TemperatureBounds, MIN_TRAINING_POINTS};

use crate::error::ConfigError;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "WXCAST_CONFIG_DIR";

const CONFIG_FILE: &str = "config.toml";
const MODEL_STORE_FILE: &str = "models.db";
const DEFAULT_CURRENT_LOCATION: &str = "Austin, TX";
const MAX_ARCHIVE_WINDOW_DAYS: u32 = 36_500;

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

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding `config.toml` and the model store
    #[serde(skip, default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Display name of the selected location, e.g. "Austin, TX"
    #[serde(default = "default_current_location")]
    pub current_location: String,

    /// Prediction tunables
    #[serde(default)]
    pub prediction: PredictionConfig,

    /// Known locations
    #[serde(default = "default_locations")]
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Models older than this are retrained
    #[serde(default = "default_max_model_age_days")]
    pub max_model_age_days: u32,

    /// Days before yesterday fetched for training
    #[serde(default = "default_archive_window_days")]
    pub archive_window_days: u32,

    #[serde(default = "default_archive_base_url")]
    pub archive_base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Optional `[min, max]` °F band; hourly samples outside it are dropped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_bounds_f: Option<TemperatureBounds>,
}

fn default_config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wxcast")
}

fn default_current_location() -> String {
    DEFAULT_CURRENT_LOCATION.to_string()
}

fn default_locations() -> Vec<Location> {
    [
        ("Austin", "TX", 30.28, -97.76),
        ("New York", "NY", 40.71, -74.01),
        ("Los Angeles", "CA", 34.05, -118.24),
        ("Chicago", "IL", 41.88, -87.63),
        ("Houston", "TX", 29.76, -95.37),
    ]
    .into_iter()
    .map(|(name, region, latitude, longitude)| Location {
        name: name.to_string(),
        region: region.to_string(),
        latitude,
        longitude,
    })
    .collect()
}

fn default_max_model_age_days() -> u32 {
    DEFAULT_MAX_MODEL_AGE_DAYS as u32
}

fn default_archive_window_days() -> u32 {
    DEFAULT_WINDOW_DAYS
}

fn default_archive_base_url() -> String {
    DEFAULT_ARCHIVE_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            max_model_age_days: default_max_model_age_days(),
            archive_window_days: default_archive_window_days(),
            archive_base_url: default_archive_base_url(),
            connect_timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_timeout_secs(),
            temperature_bounds_f: None,
        }
    }
}

impl PredictionConfig {
    pub fn archive_config(&self) -> ArchiveConfig {
        ArchiveConfig {
            base_url: self.archive_base_url.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
        }
    }

    pub fn predictor_config(&self) -> PredictorConfig {
        PredictorConfig {
            archive_window_days: self.archive_window_days,
            temperature_bounds_f: self.temperature_bounds_f,
        }
    }

    pub fn max_model_age(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.max_model_age_days))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            current_location: default_current_location(),
            prediction: PredictionConfig::default(),
            locations: default_locations(),
        }
    }
}

impl Config {
    /// Load configuration from the default directory, creating it if needed
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_dir())
    }

    /// Load configuration from `config_dir`, writing defaults if no file exists
    pub fn load_from(config_dir: impl Into<PathBuf>) -> Result<Self> {
        let config_dir = config_dir.into();
        let config_path = config_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            tracing::info!("No config at {}, writing defaults", config_path.display());
            let config = Self {
                config_dir,
                ..Self::default()
            };
            config.save()?;
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
            .context("Failed to parse config file")?;
        config.config_dir = config_dir;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Warnings are logged; errors fail the load.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        let prediction = &self.prediction;

        self.validate_url(
            &prediction.archive_base_url,
            "prediction.archive_base_url",
            &mut result,
        );

        if prediction.max_model_age_days == 0 {
            result.add_error(
                "prediction.max_model_age_days",
                "Model age must be at least one day",
            );
        }

        // The window spans archive_window_days + 1 days
        if (prediction.archive_window_days as usize) + 1 < MIN_TRAINING_POINTS {
            result.add_error(
                "prediction.archive_window_days",
                format!(
                    "Window must cover at least {} days to train a model",
                    MIN_TRAINING_POINTS
                ),
            );
        } else if prediction.archive_window_days > MAX_ARCHIVE_WINDOW_DAYS {
            result.add_error(
                "prediction.archive_window_days",
                format!("Window must not exceed {} days", MAX_ARCHIVE_WINDOW_DAYS),
            );
        } else if prediction.archive_window_days > 3650 {
            result.add_warning(
                "prediction.archive_window_days",
                "Window is more than ten years; fetches will be slow",
            );
        }

        if prediction.connect_timeout_secs == 0 {
            result.add_error("prediction.connect_timeout_secs", "Timeout must be greater than 0");
        }
        if prediction.read_timeout_secs == 0 {
            result.add_error("prediction.read_timeout_secs", "Timeout must be greater than 0");
        }

        if let Some((min, max)) = prediction.temperature_bounds_f {
            if !(min.is_finite() && max.is_finite()) || min >= max {
                result.add_error(
                    "prediction.temperature_bounds_f",
                    format!("Invalid band [{}, {}]", min, max),
                );
            }
        }

        if self.locations.is_empty() {
            result.add_error("locations", "At least one location is required");
        }
        for (index, location) in self.locations.iter().enumerate() {
            if let Err(e) = location.validate() {
                result.add_error(format!("locations[{}]", index), e.to_string());
            }
            if self.locations[..index]
                .iter()
                .any(|other| other.display_name() == location.display_name())
            {
                result.add_warning(
                    format!("locations[{}]", index),
                    format!("Duplicate location {}", location.display_name()),
                );
            }
        }

        if !self.locations.is_empty() && self.find_location(&self.current_location).is_none() {
            result.add_warning(
                "current_location",
                format!(
                    "Unknown location {}, falling back to {}",
                    self.current_location,
                    self.locations[0].display_name()
                ),
            );
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }
                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to `config_dir/config.toml`
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config_dir).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(self.config_path(), contents).context("Failed to write config file")?;

        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn model_store_path(&self) -> PathBuf {
        self.config_dir.join(MODEL_STORE_FILE)
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Find a location by display name ("Chicago, IL") or bare name ("Chicago").
    pub fn find_location(&self, name: &str) -> Option<&Location> {
        let name = name.trim();
        self.locations
            .iter()
            .find(|l| l.display_name().eq_ignore_ascii_case(name))
            .or_else(|| self.locations.iter().find(|l| l.name.eq_ignore_ascii_case(name)))
    }

    /// The selected location, or the first known one if the selection is unknown.
    pub fn current_location(&self) -> Result<&Location, ConfigError> {
        if let Some(location) = self.find_location(&self.current_location) {
            return Ok(location);
        }
        let fallback = self
            .locations
            .first()
            .ok_or_else(|| ConfigError::Invalid("no locations configured".to_string()))?;
        tracing::warn!(
            "Saved location {} not found, using {}",
            self.current_location,
            fallback
        );
        Ok(fallback)
    }

    /// Make `name` the current location. The caller persists with `save()`.
    pub fn select_location(&mut self, name: &str) -> Result<Location, ConfigError> {
        let location = self
            .find_location(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownLocation(name.to_string()))?;
        self.current_location = location.display_name();
        Ok(location)
    }

    /// Append a location to the catalogue. The caller persists with `save()`.
    pub fn add_location(&mut self, location: Location) -> Result<(), ConfigError> {
        let display_name = location.display_name();
        if self.locations.iter().any(|l| {
            l.display_name().eq_ignore_ascii_case(&display_name)
                || l.location_key() == location.location_key()
        }) {
            return Err(ConfigError::DuplicateLocation(display_name));
        }
        tracing::info!("Adding location {}", display_name);
        self.locations.push(location);
        Ok(())
    }
}
