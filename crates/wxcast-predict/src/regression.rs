//! Ordinary least-squares fit of daily mean temperature on day of year.

use chrono::{DateTime, Utc};

use crate::error::PredictError;
use crate::types::{HistoricalPoint, TrainedModel, MIN_TRAINING_POINTS};

/// Denominators smaller than this mean the covariate carries no information.
pub const DENOMINATOR_FLOOR: f64 = 1e-4;

/// Fit `temperature_f = slope * day_of_year + intercept` over every point.
///
/// `trained_at` is truncated to millisecond precision so the model compares
/// equal to its persisted form.
pub fn fit(points: &[HistoricalPoint], trained_at: DateTime<Utc>) -> Result<TrainedModel, PredictError> {
    tracing::debug!("Training model with {} data points", points.len());

    if points.len() < MIN_TRAINING_POINTS {
        tracing::error!("Insufficient data for training: {} points", points.len());
        return Err(PredictError::InsufficientData(format!(
            "{} daily points, at least {} required",
            points.len(),
            MIN_TRAINING_POINTS
        )));
    }
    let point_count = u32::try_from(points.len()).map_err(|_| {
        PredictError::InsufficientData(format!("{} points exceeds model capacity", points.len()))
    })?;

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;
    for point in points {
        let x = f64::from(point.day_of_year);
        let y = point.temperature_f;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }
    let n = f64::from(point_count);

    let denominator = n * sum_x2 - sum_x * sum_x;
    tracing::debug!(
        "Training stats - sum_x: {}, sum_y: {}, sum_xy: {}, sum_x2: {}, denominator: {}",
        sum_x,
        sum_y,
        sum_xy,
        sum_x2,
        denominator
    );
    if denominator.abs() < DENOMINATOR_FLOOR {
        tracing::error!("Cannot calculate regression: denominator too small: {}", denominator);
        return Err(PredictError::DegenerateFit(format!(
            "denominator {} below floor",
            denominator
        )));
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    if !slope.is_finite() || !intercept.is_finite() {
        tracing::error!("Invalid model parameters: m={}, b={}", slope, intercept);
        return Err(PredictError::DegenerateFit(format!(
            "invalid model: slope={}, intercept={}",
            slope, intercept
        )));
    }

    tracing::info!("Trained model: y = {}x + {} ({} points)", slope, intercept, point_count);

    Ok(TrainedModel {
        slope,
        intercept,
        trained_at: DateTime::from_timestamp_millis(trained_at.timestamp_millis())
            .unwrap_or(trained_at),
        training_point_count: point_count,
    })
}
