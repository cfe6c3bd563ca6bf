use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Minimum number of daily points accepted for training.
pub const MIN_TRAINING_POINTS: usize = 100;

/// Geographic location a model is trained for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// Create a location, validating the name and coordinate ranges.
    pub fn new(
        name: impl Into<String>,
        region: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Result<Self, LocationError> {
        let location = Self {
            name: name.into().trim().to_string(),
            region: region.into().trim().to_string(),
            latitude,
            longitude,
        };
        location.validate()?;
        Ok(location)
    }

    /// Check the invariants of a location loaded from elsewhere (e.g. a config file).
    pub fn validate(&self) -> Result<(), LocationError> {
        if self.name.is_empty() {
            return Err(LocationError::EmptyName);
        }
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(LocationError::InvalidLatitude(self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(LocationError::InvalidLongitude(self.longitude));
        }
        Ok(())
    }

    /// Human-readable name, e.g. "Austin, TX".
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.name, self.region)
    }

    /// Stable identifier used as the model store key, e.g. "Austin_30.28_-97.76".
    ///
    /// Locations with the same key share a model slot. Coordinates use Rust's
    /// shortest float formatting, so a whole-number latitude renders as `40`
    /// rather than `40.0`.
    pub fn location_key(&self) -> String {
        format!("{}_{}_{}", self.name, self.latitude, self.longitude)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.name, self.region)
    }
}

/// Location validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LocationError {
    #[error("Location name must not be empty")]
    EmptyName,
    #[error("Latitude {0} is outside -90..90")]
    InvalidLatitude(f64),
    #[error("Longitude {0} is outside -180..180")]
    InvalidLongitude(f64),
}

/// Mean temperature for one civil (UTC) day
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalPoint {
    /// 1 = January 1st, up to 366 in leap years
    pub day_of_year: u32,
    /// Daily mean, Fahrenheit
    pub temperature_f: f64,
    /// `YYYY-MM-DD`
    pub iso_date: String,
}

/// Linear model `temperature_f = slope * day_of_year + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainedModel {
    pub slope: f64,
    pub intercept: f64,
    /// Millisecond precision; the store keeps epoch milliseconds.
    pub trained_at: DateTime<Utc>,
    pub training_point_count: u32,
}

impl TrainedModel {
    /// Evaluate the model at a day of year.
    pub fn predict(&self, day_of_year: u32) -> f64 {
        self.slope * f64::from(day_of_year) + self.intercept
    }

    /// A model is stale once its age reaches `max_age`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: TimeDelta) -> bool {
        now.signed_duration_since(self.trained_at) >= max_age
    }

    /// True when both coefficients are finite and enough points were used.
    pub fn is_valid(&self) -> bool {
        self.slope.is_finite()
            && self.intercept.is_finite()
            && self.training_point_count as usize >= MIN_TRAINING_POINTS
    }
}

/// Where a prediction's model came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionSource {
    /// Served from the in-memory mirror or the model store
    Cached,
    /// A fresh model was trained for this request
    Trained,
}

/// Predicted mean temperature for tomorrow
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub temperature_f: f64,
    /// Local day of year the model was evaluated at
    pub day_of_year: u32,
    pub source: PredictionSource,
    pub model: TrainedModel,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Predicted tomorrow average: {:.1}°F (experimental)",
            self.temperature_f
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    fn austin() -> Location {
        Location::new("Austin", "TX", 30.28, -97.76).unwrap()
    }

    #[test]
    fn test_display_name() {
        assert_eq!(austin().display_name(), "Austin, TX");
        assert_eq!(austin().to_string(), "Austin, TX");
    }

    #[test]
    fn test_location_key() {
        assert_eq!(austin().location_key(), "Austin_30.28_-97.76");
        let whole = Location::new("Null Island", "XX", 0.0, -40.0).unwrap();
        assert_eq!(whole.location_key(), "Null Island_0_-40");
    }

    #[test]
    fn test_location_rejects_out_of_range() {
        assert_eq!(
            Location::new("Nowhere", "XX", 91.0, 0.0),
            Err(LocationError::InvalidLatitude(91.0))
        );
        assert_eq!(
            Location::new("Nowhere", "XX", 0.0, -180.5),
            Err(LocationError::InvalidLongitude(-180.5))
        );
        assert!(Location::new("Nowhere", "XX", f64::NAN, 0.0).is_err());
        assert_eq!(
            Location::new("  ", "XX", 0.0, 0.0),
            Err(LocationError::EmptyName)
        );
    }

    #[test]
    fn test_model_predict() {
        let model = TrainedModel {
            slope: 0.1,
            intercept: 40.0,
            trained_at: Utc::now(),
            training_point_count: 120,
        };
        assert!((model.predict(100) - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_model_staleness_is_inclusive() {
        let now = Utc::now();
        let max_age = TimeDelta::days(7);
        let model = TrainedModel {
            slope: 0.0,
            intercept: 0.0,
            trained_at: now - max_age,
            training_point_count: 100,
        };
        assert!(model.is_stale(now, max_age));
        assert!(!model.is_stale(now - TimeDelta::milliseconds(1), max_age));
    }

    #[test]
    fn test_model_validity() {
        let mut model = TrainedModel {
            slope: 0.2,
            intercept: 14.0,
            trained_at: Utc::now(),
            training_point_count: 100,
        };
        assert!(model.is_valid());
        model.training_point_count = 99;
        assert!(!model.is_valid());
        model.training_point_count = 100;
        model.slope = f64::INFINITY;
        assert!(!model.is_valid());
    }

    #[test]
    fn test_prediction_display() {
        let prediction = Prediction {
            temperature_f: 51.26,
            day_of_year: 100,
            source: PredictionSource::Cached,
            model: TrainedModel {
                slope: 0.1,
                intercept: 41.26,
                trained_at: Utc::now(),
                training_point_count: 121,
            },
        };
        assert_eq!(
            prediction.to_string(),
            "Predicted tomorrow average: 51.3°F (experimental)"
        );
    }
}
