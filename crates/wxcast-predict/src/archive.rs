//! Historical weather archive client (Open-Meteo archive API).
//!
//! Returns raw hourly samples in degrees Celsius; unit conversion and
//! per-sample validation belong to the aggregator.

use std::time::Duration;

use chrono::{Days, NaiveDate};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::instrument;

use crate::error::PredictError;
use crate::types::Location;

pub const DEFAULT_ARCHIVE_BASE_URL: &str = "https://archive-api.open-meteo.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_WINDOW_DAYS: u32 = 120;

const ARCHIVE_PATH: &str = "/v1/archive";
const USER_AGENT: &str = concat!("wxcast/", env!("CARGO_PKG_VERSION"));

/// Archive client settings
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ARCHIVE_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Closed date interval `[start_date, end_date]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ArchiveWindow {
    /// Window of `window_days + 1` calendar days ending yesterday.
    ///
    /// `None` when the start date falls outside the representable calendar.
    pub fn ending_yesterday(today_utc: NaiveDate, window_days: u32) -> Option<Self> {
        let end_date = today_utc.pred_opt()?;
        let start_date = end_date.checked_sub_days(Days::new(u64::from(window_days)))?;
        Some(Self {
            start_date,
            end_date,
        })
    }

    /// Number of calendar days covered, inclusive of both ends.
    pub fn days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

/// Parallel hourly arrays as returned by the archive.
///
/// Only the envelope and the array lengths are checked here. Individual
/// timestamps and temperatures are passed through unvalidated; the daily
/// aggregator drops samples with a short timestamp, an unparseable date or
/// a missing temperature.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HourlySeries {
    /// `YYYY-MM-DDTHH:MM`, UTC
    pub time: Vec<Option<String>>,
    /// Degrees Celsius; the archive reports gaps as null
    #[serde(rename = "temperature_2m")]
    pub temperature_c: Vec<Option<f64>>,
}

impl HourlySeries {
    pub fn len(&self) -> usize {
        self.time.len().min(self.temperature_c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Deserialize)]
struct ArchiveEnvelope {
    hourly: HourlySeries,
}

/// Validate an archive response body and extract the hourly arrays.
pub fn parse_archive_body(body: &str) -> Result<HourlySeries, PredictError> {
    let envelope: ArchiveEnvelope = serde_json::from_str(body)
        .map_err(|e| PredictError::MalformedResponse(format!("JSON parse error: {}", e)))?;
    let series = envelope.hourly;

    if series.time.is_empty() || series.temperature_c.is_empty() {
        return Err(PredictError::MalformedResponse(
            "Empty data arrays from archive".to_string(),
        ));
    }
    if series.time.len() != series.temperature_c.len() {
        return Err(PredictError::MalformedResponse(format!(
            "Array length mismatch: time={}, temperature_2m={}",
            series.time.len(),
            series.temperature_c.len()
        )));
    }

    Ok(series)
}

/// Stateless client for hourly temperature history
#[derive(Debug, Clone)]
pub struct ArchiveClient {
    client: Client,
    base_url: String,
}

impl ArchiveClient {
    pub fn new(config: &ArchiveConfig) -> Result<Self, PredictError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Client with default timeouts against another archive host.
    pub fn with_base_url(base_url: &str) -> Result<Self, PredictError> {
        Self::new(&ArchiveConfig {
            base_url: base_url.to_string(),
            ..ArchiveConfig::default()
        })
    }

    /// Fetch hourly temperatures for `location` over `window`.
    ///
    /// Dropping the returned future aborts the request and releases the
    /// connection.
    #[instrument(skip(self, location), fields(location = %location), level = "info")]
    pub async fn fetch_hourly(
        &self,
        location: &Location,
        window: ArchiveWindow,
    ) -> Result<HourlySeries, PredictError> {
        let url = format!("{}{}", self.base_url, ARCHIVE_PATH);
        let start_date = window.start_date.format("%Y-%m-%d").to_string();
        let end_date = window.end_date.format("%Y-%m-%d").to_string();

        tracing::debug!(
            "Requesting archive {} to {} ({} days)",
            start_date,
            end_date,
            window.days()
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("latitude", location.latitude.to_string()),
                ("longitude", location.longitude.to_string()),
                ("hourly", "temperature_2m".to_string()),
                ("start_date", start_date),
                ("end_date", end_date),
                ("timezone", "UTC".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Archive returned status {}: {}", status, body);
            return Err(PredictError::RemoteStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        tracing::debug!("Archive response received, length: {}", body.len());

        let series = parse_archive_body(&body)?;
        tracing::info!("Archive returned {} hourly samples", series.len());
        Ok(series)
    }
}
