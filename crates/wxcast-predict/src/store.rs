//! SQLite-backed model store, one record per location key.
//!
//! Coefficients are stored as their IEEE-754 bit patterns so they round-trip
//! exactly. A record is treated as absent when any field is missing or
//! malformed, when it was trained for a different display name, or when it
//! is stale.

use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::PredictError;
use crate::types::{Location, TrainedModel, MIN_TRAINING_POINTS};

pub const DEFAULT_MAX_MODEL_AGE_DAYS: i64 = 7;

/// Persistent store of trained models.
///
/// The connection sits behind a mutex, so `get` and `put` are serialized and
/// a reader never observes a half-written record.
#[derive(Debug)]
pub struct ModelStore {
    conn: Mutex<Option<Connection>>,
    max_model_age: TimeDelta,
}

/// Row as read back from SQLite, before validation.
struct StoredRecord {
    slope_bits: Option<i64>,
    intercept_bits: Option<i64>,
    trained_at_ms: Option<i64>,
    point_count: Option<i64>,
    display_name: Option<String>,
}

impl StoredRecord {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            slope_bits: integer(row.get(0)?),
            intercept_bits: integer(row.get(1)?),
            trained_at_ms: integer(row.get(2)?),
            point_count: integer(row.get(3)?),
            display_name: match row.get::<_, Value>(4)? {
                Value::Text(s) => Some(s),
                _ => None,
            },
        })
    }

    /// Decode into a model and the display name it was trained for.
    fn decode(self) -> Option<(TrainedModel, String)> {
        let slope = f64::from_bits(self.slope_bits? as u64);
        let intercept = f64::from_bits(self.intercept_bits? as u64);
        let trained_at = DateTime::from_timestamp_millis(self.trained_at_ms?)?;
        let training_point_count = u32::try_from(self.point_count?).ok()?;

        let model = TrainedModel {
            slope,
            intercept,
            trained_at,
            training_point_count,
        };
        model.is_valid().then_some((model, self.display_name?))
    }
}

fn integer(value: Value) -> Option<i64> {
    match value {
        Value::Integer(v) => Some(v),
        _ => None,
    }
}

impl ModelStore {
    /// Open (or create) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P, max_model_age: TimeDelta) -> Result<Self, PredictError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, max_model_age)
    }

    /// Create an in-memory store.
    pub fn in_memory(max_model_age: TimeDelta) -> Result<Self, PredictError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, max_model_age)
    }

    fn with_connection(conn: Connection, max_model_age: TimeDelta) -> Result<Self, PredictError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS models (
                location_key TEXT PRIMARY KEY,
                slope_bits INTEGER,
                intercept_bits INTEGER,
                trained_at_ms INTEGER,
                point_count INTEGER,
                display_name TEXT
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            max_model_age,
        })
    }

    pub fn max_model_age(&self) -> TimeDelta {
        self.max_model_age
    }

    /// Model stored for `location`, if present, well-formed, trained for the
    /// same display name, and younger than the maximum model age.
    pub fn get(
        &self,
        location: &Location,
        now: DateTime<Utc>,
    ) -> Result<Option<TrainedModel>, PredictError> {
        let key = location.location_key();
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or_else(closed)?;

        let record = conn
            .query_row(
                "SELECT slope_bits, intercept_bits, trained_at_ms, point_count, display_name
                 FROM models WHERE location_key = ?1",
                params![key],
                StoredRecord::from_row,
            )
            .optional()?;
        drop(guard);

        let Some(record) = record else {
            tracing::debug!("No stored model for {}", key);
            return Ok(None);
        };

        let Some((model, display_name)) = record.decode() else {
            tracing::warn!("Stored model for {} is malformed, ignoring", key);
            return Ok(None);
        };

        if display_name != location.display_name() {
            tracing::debug!(
                "Stored model is for different location: {} vs {}",
                display_name,
                location.display_name()
            );
            return Ok(None);
        }

        if model.is_stale(now, self.max_model_age) {
            tracing::debug!(
                "Stored model for {} is stale (older than {} days)",
                display_name,
                self.max_model_age.num_days()
            );
            return Ok(None);
        }

        Ok(Some(model))
    }

    /// Replace the record for `location` with `model`.
    pub fn put(&self, location: &Location, model: &TrainedModel) -> Result<(), PredictError> {
        if !model.slope.is_finite() || !model.intercept.is_finite() {
            return Err(PredictError::DegenerateFit(
                "refusing to store non-finite coefficients".to_string(),
            ));
        }
        if (model.training_point_count as usize) < MIN_TRAINING_POINTS {
            return Err(PredictError::InsufficientData(format!(
                "refusing to store model trained on {} points",
                model.training_point_count
            )));
        }

        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or_else(closed)?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO models
            (location_key, slope_bits, intercept_bits, trained_at_ms, point_count, display_name)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                location.location_key(),
                model.slope.to_bits() as i64,
                model.intercept.to_bits() as i64,
                model.trained_at.timestamp_millis(),
                i64::from(model.training_point_count),
                location.display_name(),
            ],
        )?;

        tracing::debug!(
            "Saved model for {}: slope={}, intercept={}, trained_at={}, points={}",
            location.display_name(),
            model.slope,
            model.intercept,
            model.trained_at,
            model.training_point_count
        );
        Ok(())
    }

    /// Close the underlying connection. Later calls fail with `StoreIo`.
    pub fn close(&self) -> Result<(), PredictError> {
        if let Some(conn) = self.conn.lock().take() {
            conn.close().map_err(|(_, e)| PredictError::from(e))?;
        }
        Ok(())
    }
}

fn closed() -> PredictError {
    PredictError::StoreIo("model store is closed".to_string())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::error::ErrorKind;

    fn store() -> ModelStore {
        ModelStore::in_memory(TimeDelta::days(DEFAULT_MAX_MODEL_AGE_DAYS)).unwrap()
    }

    fn austin() -> Location {
        Location::new("Austin", "TX", 30.28, -97.76).unwrap()
    }

    fn chicago() -> Location {
        Location::new("Chicago", "IL", 41.88, -87.63).unwrap()
    }

    fn model(trained_at: DateTime<Utc>) -> TrainedModel {
        TrainedModel {
            slope: 0.1,
            intercept: 40.0,
            trained_at,
            training_point_count: 120,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
    }

    #[test]
    fn test_read_your_writes() {
        let store = store();
        let now = now();
        let stored = TrainedModel {
            slope: 0.1 + 0.2,
            intercept: std::f64::consts::PI * 1e-7,
            trained_at: now,
            training_point_count: 121,
        };

        store.put(&austin(), &stored).unwrap();
        let loaded = store.get(&austin(), now).unwrap().unwrap();

        assert_eq!(loaded, stored);
        assert_eq!(loaded.slope.to_bits(), stored.slope.to_bits());
        assert_eq!(loaded.intercept.to_bits(), stored.intercept.to_bits());
    }

    #[test]
    fn test_missing_record_is_absent() {
        assert!(store().get(&austin(), now()).unwrap().is_none());
    }

    #[test]
    fn test_staleness_boundary() {
        let store = store();
        let now = now();
        let max_age = TimeDelta::days(7);

        store
            .put(&austin(), &model(now - max_age - TimeDelta::milliseconds(1)))
            .unwrap();
        assert!(store.get(&austin(), now).unwrap().is_none());

        store
            .put(&austin(), &model(now - max_age + TimeDelta::milliseconds(1)))
            .unwrap();
        assert!(store.get(&austin(), now).unwrap().is_some());
    }

    #[test]
    fn test_location_isolation() {
        let store = store();
        let now = now();

        store.put(&austin(), &model(now)).unwrap();
        assert!(store.get(&chicago(), now).unwrap().is_none());

        let chicago_model = TrainedModel {
            slope: -0.05,
            ..model(now)
        };
        store.put(&chicago(), &chicago_model).unwrap();
        store.put(&austin(), &model(now)).unwrap();
        assert_eq!(store.get(&chicago(), now).unwrap(), Some(chicago_model));
    }

    #[test]
    fn test_display_name_mismatch_is_absent() {
        let store = store();
        let now = now();
        store.put(&austin(), &model(now)).unwrap();

        // Same key, different region.
        let renamed = Location::new("Austin", "Texas", 30.28, -97.76).unwrap();
        assert_eq!(renamed.location_key(), austin().location_key());
        assert!(store.get(&renamed, now).unwrap().is_none());
    }

    #[test]
    fn test_put_replaces_record() {
        let store = store();
        let now = now();
        store.put(&austin(), &model(now - TimeDelta::days(1))).unwrap();
        let newer = TrainedModel {
            slope: 0.3,
            intercept: 12.0,
            trained_at: now,
            training_point_count: 118,
        };
        store.put(&austin(), &newer).unwrap();
        assert_eq!(store.get(&austin(), now).unwrap(), Some(newer));
    }

    #[test]
    fn test_malformed_fields_are_absent() {
        let store = store();
        let now = now();
        store.put(&austin(), &model(now)).unwrap();

        {
            let guard = store.conn.lock();
            let conn = guard.as_ref().unwrap();
            conn.execute(
                "UPDATE models SET slope_bits = 'not-a-number' WHERE location_key = ?1",
                params![austin().location_key()],
            )
            .unwrap();
        }
        assert!(store.get(&austin(), now).unwrap().is_none());

        store.put(&austin(), &model(now)).unwrap();
        {
            let guard = store.conn.lock();
            let conn = guard.as_ref().unwrap();
            conn.execute(
                "UPDATE models SET point_count = 12, display_name = NULL WHERE location_key = ?1",
                params![austin().location_key()],
            )
            .unwrap();
        }
        assert!(store.get(&austin(), now).unwrap().is_none());
    }

    #[test]
    fn test_put_rejects_invalid_model() {
        let store = store();
        let mut bad = model(now());
        bad.training_point_count = 42;
        assert_eq!(
            store.put(&austin(), &bad).unwrap_err().kind(),
            ErrorKind::InsufficientData
        );
        bad.training_point_count = 120;
        bad.slope = f64::NAN;
        assert_eq!(
            store.put(&austin(), &bad).unwrap_err().kind(),
            ErrorKind::DegenerateFit
        );
        assert!(store.get(&austin(), now()).unwrap().is_none());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.db");
        let now = now();

        {
            let store = ModelStore::open(&path, TimeDelta::days(7)).unwrap();
            store.put(&austin(), &model(now)).unwrap();
            store.close().unwrap();
        }

        let store = ModelStore::open(&path, TimeDelta::days(7)).unwrap();
        assert_eq!(store.get(&austin(), now).unwrap(), Some(model(now)));
    }

    #[test]
    fn test_closed_store_reports_store_io() {
        let store = store();
        store.close().unwrap();
        let err = store.get(&austin(), now()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreIo);
    }
}
