//! Hourly samples to daily mean temperatures.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::archive::HourlySeries;
use crate::clock::day_of_year;
use crate::error::PredictError;
use crate::types::HistoricalPoint;

/// Inclusive Fahrenheit band outside of which hourly samples are dropped.
pub type TemperatureBounds = (f64, f64);

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Group hourly samples by UTC date and average them.
///
/// Samples with a missing or short timestamp, a missing or non-finite
/// temperature, or (with `bounds`) a converted temperature outside the band
/// are skipped. Output is ordered by date.
pub fn aggregate_daily(
    series: &HourlySeries,
    bounds: Option<TemperatureBounds>,
) -> Result<Vec<HistoricalPoint>, PredictError> {
    if series.is_empty() {
        return Err(PredictError::InsufficientData(
            "archive response has no samples".to_string(),
        ));
    }

    // Keyed by `YYYY-MM-DD`, so iteration order is chronological.
    let mut buckets: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    let mut rejected = 0usize;

    for (index, (time, temp)) in series
        .time
        .iter()
        .zip(series.temperature_c.iter())
        .enumerate()
    {
        let Some(date_key) = time.as_deref().and_then(|t| t.get(..10)) else {
            tracing::debug!("Invalid time string at index {}: {:?}", index, time);
            rejected += 1;
            continue;
        };

        let celsius = match temp {
            Some(c) if c.is_finite() => *c,
            _ => {
                tracing::debug!("Invalid temperature at index {}: {:?}", index, temp);
                rejected += 1;
                continue;
            }
        };

        let fahrenheit = celsius_to_fahrenheit(celsius);
        if let Some((min, max)) = bounds {
            if !(min..=max).contains(&fahrenheit) {
                tracing::debug!(
                    "Temperature {}°F at index {} outside sanity band",
                    fahrenheit,
                    index
                );
                rejected += 1;
                continue;
            }
        }

        buckets.entry(date_key).or_default().push(fahrenheit);
    }

    tracing::debug!(
        "Processed {} valid samples, {} rejected, {} distinct dates",
        series.len().saturating_sub(rejected),
        rejected,
        buckets.len()
    );

    let mut points = Vec::with_capacity(buckets.len());
    for (date_key, temps) in buckets {
        if temps.is_empty() {
            continue;
        }

        let mean = temps.iter().sum::<f64>() / temps.len() as f64;
        if !mean.is_finite() {
            tracing::warn!("Invalid average for date {}", date_key);
            continue;
        }

        let date = match NaiveDate::parse_from_str(date_key, "%Y-%m-%d") {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("Invalid date {}: {}", date_key, e);
                continue;
            }
        };

        points.push(HistoricalPoint {
            day_of_year: day_of_year(date),
            temperature_f: mean,
            iso_date: date_key.to_string(),
        });
    }

    if points.is_empty() {
        return Err(PredictError::InsufficientData(
            "no valid data in archive response".to_string(),
        ));
    }

    Ok(points)
}

/// Descriptive statistics of a training set, for logging and diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub count: usize,
    pub first_date: String,
    pub last_date: String,
    pub min_f: f64,
    pub max_f: f64,
    pub mean_f: f64,
}

pub fn summarize(points: &[HistoricalPoint]) -> Option<TrainingSummary> {
    let first = points.first()?;
    let last = points.last()?;

    let (min_f, max_f, sum) = points.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, 0.0),
        |(min, max, sum), p| {
            (
                min.min(p.temperature_f),
                max.max(p.temperature_f),
                sum + p.temperature_f,
            )
        },
    );

    Some(TrainingSummary {
        count: points.len(),
        first_date: first.iso_date.clone(),
        last_date: last.iso_date.clone(),
        min_f,
        max_f,
        mean_f: sum / points.len() as f64,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::error::ErrorKind;

    fn series(samples: &[(&str, f64)]) -> HourlySeries {
        HourlySeries {
            time: samples.iter().map(|(t, _)| Some(t.to_string())).collect(),
            temperature_c: samples.iter().map(|(_, c)| Some(*c)).collect(),
        }
    }

    #[test]
    fn test_freezing_point_converts_exactly() {
        let points = aggregate_daily(&series(&[("2024-06-01T12:00", 0.0)]), None).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].temperature_f, 32.0);
        assert_eq!(points[0].iso_date, "2024-06-01");
        assert_eq!(points[0].day_of_year, 153);
    }

    #[test]
    fn test_daily_mean_of_hours() {
        let points = aggregate_daily(
            &series(&[
                ("2024-01-01T00:00", 0.0),
                ("2024-01-01T01:00", 10.0),
                ("2024-01-02T00:00", 100.0),
            ]),
            None,
        )
        .unwrap();

        assert_eq!(points.len(), 2);
        assert!((points[0].temperature_f - 41.0).abs() < 1e-12);
        assert_eq!(points[0].day_of_year, 1);
        assert!((points[1].temperature_f - 212.0).abs() < 1e-12);
        assert_eq!(points[1].day_of_year, 2);
    }

    #[test]
    fn test_output_is_chronological_regardless_of_input_order() {
        let points = aggregate_daily(
            &series(&[
                ("2024-03-02T00:00", 1.0),
                ("2023-12-31T23:00", 1.0),
                ("2024-01-01T00:00", 1.0),
            ]),
            None,
        )
        .unwrap();

        let dates: Vec<&str> = points.iter().map(|p| p.iso_date.as_str()).collect();
        assert_eq!(dates, vec!["2023-12-31", "2024-01-01", "2024-03-02"]);
        assert_eq!(points[0].day_of_year, 365);
        assert_eq!(points[2].day_of_year, 62);
    }

    #[test]
    fn test_invalid_samples_are_skipped() {
        let input = HourlySeries {
            time: vec![
                Some("2024-01-01T00:00".into()),
                None,
                Some("2024-01".into()),
                Some("2024-01-01T03:00".into()),
                Some("2024-01-01T04:00".into()),
                Some("2024-01-01T05:00".into()),
            ],
            temperature_c: vec![
                Some(10.0),
                Some(50.0),
                Some(50.0),
                None,
                Some(f64::NAN),
                Some(20.0),
            ],
        };

        let points = aggregate_daily(&input, None).unwrap();
        assert_eq!(points.len(), 1);
        assert!((points[0].temperature_f - 59.0).abs() < 1e-12);
    }

    #[test]
    fn test_walks_up_to_shorter_array() {
        let input = HourlySeries {
            time: vec![
                Some("2024-01-01T00:00".into()),
                Some("2024-01-02T00:00".into()),
            ],
            temperature_c: vec![Some(5.0)],
        };
        let points = aggregate_daily(&input, None).unwrap();
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn test_unparseable_date_bucket_is_dropped() {
        let points = aggregate_daily(
            &series(&[("2024-13-45T00:00", 1.0), ("2024-01-05T00:00", 1.0)]),
            None,
        )
        .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].iso_date, "2024-01-05");
    }

    #[test]
    fn test_sanity_band_filters_samples() {
        let points = aggregate_daily(
            &series(&[
                ("2024-01-01T00:00", 10.0),
                ("2024-01-01T01:00", 500.0),
            ]),
            Some((-100.0, 150.0)),
        )
        .unwrap();
        assert_eq!(points[0].temperature_f, 50.0);
    }

    #[test]
    fn test_empty_input_is_insufficient() {
        let err = aggregate_daily(&HourlySeries::default(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
    }

    #[test]
    fn test_all_rejected_is_insufficient() {
        let input = HourlySeries {
            time: vec![Some("2024-01-01T00:00".into()), Some("bad".into())],
            temperature_c: vec![None, Some(3.0)],
        };
        let err = aggregate_daily(&input, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let input = series(&[
            ("2024-02-28T00:00", 3.3),
            ("2024-02-29T00:00", -1.7),
            ("2024-02-29T12:00", 4.1),
            ("2024-03-01T00:00", 7.9),
        ]);
        let first = aggregate_daily(&input, None).unwrap();
        let second = aggregate_daily(&input, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_points_are_finite_and_in_range() {
        let mut samples = Vec::new();
        for day in 0..400u32 {
            let date = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap() + chrono::Days::new(day.into());
            samples.push((format!("{}T06:00", date), f64::from(day % 40) - 10.0));
        }
        let input = HourlySeries {
            time: samples.iter().map(|(t, _)| Some(t.clone())).collect(),
            temperature_c: samples.iter().map(|(_, c)| Some(*c)).collect(),
        };

        let points = aggregate_daily(&input, None).unwrap();
        assert_eq!(points.len(), 400);
        assert!(points
            .iter()
            .all(|p| p.temperature_f.is_finite() && (1..=366).contains(&p.day_of_year)));
    }

    #[test]
    fn test_summarize() {
        let points = aggregate_daily(
            &series(&[
                ("2024-01-01T00:00", 0.0),
                ("2024-01-02T00:00", 10.0),
                ("2024-01-03T00:00", 20.0),
            ]),
            None,
        )
        .unwrap();

        let summary = summarize(&points).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.first_date, "2024-01-01");
        assert_eq!(summary.last_date, "2024-01-03");
        assert_eq!(summary.min_f, 32.0);
        assert_eq!(summary.max_f, 68.0);
        assert!((summary.mean_f - 50.0).abs() < 1e-12);
        assert!(summarize(&[]).is_none());
    }
}
