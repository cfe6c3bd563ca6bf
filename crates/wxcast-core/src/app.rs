use std::sync::Arc;

use wxcast_predict::{ArchiveClient, Location, ModelStore, Prediction, Predictor, TrainingReport};

use crate::config::Config;
use crate::error::{AppError, ConfigError};

/// Application state: configuration plus the predictor built from it
pub struct App {
    config: Config,
    predictor: Predictor,
}

impl App {
    /// Load and validate the configuration, then open the model store
    pub fn new() -> Result<Self, AppError> {
        let (config, _) = Config::load_validated()?;
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Result<Self, AppError> {
        std::fs::create_dir_all(config.config_dir())?;

        let store = ModelStore::open(
            config.model_store_path(),
            config.prediction.max_model_age(),
        )?;
        let archive = ArchiveClient::new(&config.prediction.archive_config())?;
        let predictor = Predictor::new(
            archive,
            Arc::new(store),
            config.prediction.predictor_config(),
        );
        predictor.set_active_location(config.current_location()?);

        tracing::info!(
            "Application initialized (store: {}, archive: {})",
            config.model_store_path().display(),
            config.prediction.archive_base_url
        );

        Ok(Self { config, predictor })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    pub fn locations(&self) -> &[Location] {
        &self.config.locations
    }

    pub fn current_location(&self) -> Result<&Location, AppError> {
        Ok(self.config.current_location()?)
    }

    /// Named location, or the current one when `name` is `None`.
    pub fn resolve_location(&self, name: Option<&str>) -> Result<Location, AppError> {
        match name {
            Some(name) => self
                .config
                .find_location(name)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownLocation(name.to_string()).into()),
            None => Ok(self.current_location()?.clone()),
        }
    }

    pub async fn predict(&self, name: Option<&str>) -> Result<Prediction, AppError> {
        let location = self.resolve_location(name)?;
        self.predictor.set_active_location(&location);
        Ok(self.predictor.predict_tomorrow(&location).await?)
    }

    /// Fetch and fit without storing anything.
    pub async fn check(&self, name: Option<&str>) -> Result<TrainingReport, AppError> {
        let location = self.resolve_location(name)?;
        Ok(self.predictor.check(&location).await?)
    }

    /// Persist `name` as the current location.
    pub fn select_location(&mut self, name: &str) -> Result<Location, AppError> {
        let location = self.config.select_location(name)?;
        self.config.save()?;
        self.predictor.set_active_location(&location);
        tracing::info!("Selected location {}", location);
        Ok(location)
    }

    pub fn add_location(&mut self, location: Location) -> Result<(), AppError> {
        location.validate()?;
        self.config.add_location(location)?;
        self.config.save()?;
        Ok(())
    }

    /// Cancel in-flight predictions and close the model store
    pub fn shutdown(&mut self) -> Result<(), AppError> {
        tracing::info!("Shutting down application");
        self.predictor.shutdown();
        self.predictor.store().close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use chrono::{Datelike, Days, NaiveDate};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use wxcast_predict::{PredictError, PredictionSource};

    fn archive_body(days: u64) -> serde_json::Value {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut time = Vec::new();
        let mut temperature = Vec::new();
        for day in 0..days {
            let date = start + Days::new(day);
            for hour in 0..24 {
                time.push(format!("{}T{:02}:00", date, hour));
                temperature.push(f64::from(date.ordinal()) / 10.0);
            }
        }
        serde_json::json!({ "hourly": { "time": time, "temperature_2m": temperature } })
    }

    fn config(dir: &std::path::Path, server: &MockServer) -> Config {
        let mut config = Config {
            config_dir: dir.to_path_buf(),
            ..Config::default()
        };
        config.prediction.archive_base_url = server.uri();
        config
    }

    #[tokio::test]
    async fn test_predict_trains_once_and_persists() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/archive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(archive_body(121)))
            .expect(1)
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();

        let mut app = App::with_config(config(dir.path(), &server)).unwrap();
        let first = app.predict(None).await.unwrap();
        assert_eq!(first.source, PredictionSource::Trained);
        app.shutdown().unwrap();

        // A fresh process reads the stored model instead of fetching again.
        let mut app = App::with_config(config(dir.path(), &server)).unwrap();
        let second = app.predict(Some("Austin, TX")).await.unwrap();
        assert_eq!(second.source, PredictionSource::Cached);
        assert_eq!(second.model, first.model);
        app.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_insufficient_history_surfaces_as_prediction_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/archive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(archive_body(60)))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();

        let app = App::with_config(config(dir.path(), &server)).unwrap();
        let err = app.predict(None).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::Prediction(PredictError::InsufficientData(_))
        ));
    }

    #[tokio::test]
    async fn test_select_and_add_location_persist() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        let mut app = App::with_config(config(dir.path(), &server)).unwrap();
        app.add_location(Location::new("Denver", "CO", 39.74, -104.99).unwrap())
            .unwrap();
        let selected = app.select_location("Denver").unwrap();
        assert_eq!(selected.display_name(), "Denver, CO");

        let reloaded = Config::load_from(dir.path()).unwrap();
        assert_eq!(reloaded.current_location, "Denver, CO");
        assert!(reloaded.find_location("Denver").is_some());

        assert!(matches!(
            app.select_location("Atlantis"),
            Err(AppError::Config(ConfigError::UnknownLocation(_)))
        ));
        assert!(matches!(
            app.add_location(Location {
                name: "Bad".into(),
                region: "XX".into(),
                latitude: 0.0,
                longitude: 200.0,
            }),
            Err(AppError::Location(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_location_name() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let app = App::with_config(config(dir.path(), &server)).unwrap();

        let err = app.predict(Some("Springfield")).await.unwrap_err();
        assert!(matches!(err, AppError::Config(ConfigError::UnknownLocation(_))));
    }
}
