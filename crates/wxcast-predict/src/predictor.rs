//! Tomorrow's mean temperature for a location.
//!
//! A request is served from the in-memory mirror or the model store when a
//! fresh model exists (fast path). Otherwise a single background task fetches
//! the archive window, aggregates, fits, stores and evaluates the model (cold
//! path). Concurrent requests for the same location join the task already in
//! flight instead of starting another archive fetch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::aggregate::{aggregate_daily, summarize, TemperatureBounds, TrainingSummary};
use crate::archive::{ArchiveClient, ArchiveWindow, DEFAULT_WINDOW_DAYS};
use crate::clock::{tomorrow_day_of_year, Clock, SystemClock};
use crate::error::PredictError;
use crate::regression;
use crate::store::ModelStore;
use crate::types::{Location, Prediction, PredictionSource, TrainedModel};

type PredictionResult = Result<Prediction, PredictError>;
type ReportResult = Result<TrainingReport, PredictError>;

/// Predictor settings
#[derive(Debug, Clone)]
pub struct PredictorConfig {
    /// Days before yesterday included in the training window
    pub archive_window_days: u32,
    /// Optional Fahrenheit sanity band applied to hourly samples
    pub temperature_bounds_f: Option<TemperatureBounds>,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            archive_window_days: DEFAULT_WINDOW_DAYS,
            temperature_bounds_f: None,
        }
    }
}

/// Result of a full fetch/aggregate/fit run.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub window: ArchiveWindow,
    pub hourly_samples: usize,
    pub summary: Option<TrainingSummary>,
    pub prediction: Prediction,
}

#[derive(Debug)]
struct MirroredModel {
    location_key: String,
    display_name: String,
    model: TrainedModel,
}

#[derive(Debug)]
struct InFlight {
    id: u64,
    result_tx: broadcast::Sender<ReportResult>,
    cancel: CancellationToken,
    /// Set once any caller wants the fitted model stored
    persist: bool,
}

#[derive(Debug)]
struct Inner {
    archive: ArchiveClient,
    store: Arc<ModelStore>,
    config: PredictorConfig,
    clock: Arc<dyn Clock>,
    mirror: Mutex<Option<MirroredModel>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

/// Cheap to clone; clones share the mirror, the in-flight registry and the store.
#[derive(Debug, Clone)]
pub struct Predictor {
    inner: Arc<Inner>,
}

impl Predictor {
    pub fn new(archive: ArchiveClient, store: Arc<ModelStore>, config: PredictorConfig) -> Self {
        Self::with_clock(archive, store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        archive: ArchiveClient,
        store: Arc<ModelStore>,
        config: PredictorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                archive,
                store,
                config,
                clock,
                mirror: Mutex::new(None),
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<ModelStore> {
        &self.inner.store
    }

    /// Drop the in-memory model if it belongs to a different location.
    pub fn set_active_location(&self, location: &Location) {
        let key = location.location_key();
        let mut mirror = self.inner.mirror.lock();
        if mirror.as_ref().is_some_and(|m| m.location_key != key) {
            tracing::info!("Active location changed to {}, clearing cached model", location);
            *mirror = None;
        }
    }

    /// Predict tomorrow's mean temperature (°F) at `location`.
    #[instrument(skip(self, location), fields(location = %location), level = "info")]
    pub async fn predict_tomorrow(&self, location: &Location) -> PredictionResult {
        if let Some(model) = self.inner.cached_model(location).await? {
            return Ok(self.inner.evaluate(model, PredictionSource::Cached));
        }

        tracing::info!("No valid cached model, training new model");
        let report = receive(self.inner.join_or_start(location, true)).await?;
        Ok(report.prediction)
    }

    /// Fetch, aggregate and fit without storing the model.
    ///
    /// Shares the in-flight request for `location` if there is one; that
    /// request still stores its model when a prediction asked for it.
    #[instrument(skip(self, location), fields(location = %location), level = "info")]
    pub async fn check(&self, location: &Location) -> ReportResult {
        receive(self.inner.join_or_start(location, false)).await
    }

    /// Cancel the in-flight cold path for `location`, if any.
    ///
    /// Returns whether a request was cancelled. A cancelled request never
    /// writes to the store.
    pub fn cancel(&self, location: &Location) -> bool {
        let in_flight = self.inner.in_flight.lock();
        match in_flight.get(&location.location_key()) {
            Some(entry) => {
                tracing::info!("Cancelling prediction for {}", location);
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of locations with a cold path currently running.
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Cancel every in-flight request; later cold paths fail immediately.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down predictor");
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    async fn cached_model(&self, location: &Location) -> Result<Option<TrainedModel>, PredictError> {
        let now = self.clock.now();
        if let Some(model) = self.mirrored_model(location, now) {
            tracing::debug!("Using in-memory model for {}", location);
            return Ok(Some(model));
        }

        let store = Arc::clone(&self.store);
        let stored_location = location.clone();
        let model = tokio::task::spawn_blocking(move || store.get(&stored_location, now))
            .await
            .map_err(store_task_failed)??;
        if let Some(model) = model {
            tracing::debug!("Loaded stored model for {}", location);
            self.remember(location, model);
        }
        Ok(model)
    }

    fn mirrored_model(&self, location: &Location, now: DateTime<Utc>) -> Option<TrainedModel> {
        let mirror = self.mirror.lock();
        let mirrored = mirror.as_ref()?;
        (mirrored.location_key == location.location_key()
            && mirrored.display_name == location.display_name()
            && !mirrored.model.is_stale(now, self.store.max_model_age()))
        .then_some(mirrored.model)
    }

    fn remember(&self, location: &Location, model: TrainedModel) {
        *self.mirror.lock() = Some(MirroredModel {
            location_key: location.location_key(),
            display_name: location.display_name(),
            model,
        });
    }

    fn evaluate(&self, model: TrainedModel, source: PredictionSource) -> Prediction {
        let day_of_year = tomorrow_day_of_year(self.clock.today_local());
        let temperature_f = model.predict(day_of_year);
        tracing::info!(
            "Prediction: {:.1}°F for day of year {} ({:?} model)",
            temperature_f,
            day_of_year,
            source
        );
        Prediction {
            temperature_f,
            day_of_year,
            source,
            model,
        }
    }

    /// Subscribe to the in-flight request for `location`, starting one if needed.
    ///
    /// With `persist`, the request stores its model before reporting.
    fn join_or_start(
        self: &Arc<Self>,
        location: &Location,
        persist: bool,
    ) -> broadcast::Receiver<ReportResult> {
        let key = location.location_key();
        let mut in_flight = self.in_flight.lock();

        if let Some(entry) = in_flight.get_mut(&key) {
            tracing::info!("Training for {} already in flight, joining", location);
            entry.persist |= persist;
            return entry.result_tx.subscribe();
        }

        let (result_tx, result_rx) = broadcast::channel(1);
        let cancel = self.shutdown.child_token();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        in_flight.insert(
            key.clone(),
            InFlight {
                id,
                result_tx,
                cancel: cancel.clone(),
                persist,
            },
        );
        drop(in_flight);

        let inner = Arc::clone(self);
        let location = location.clone();
        tokio::spawn(async move {
            let guard = InFlightGuard {
                inner: Arc::clone(&inner),
                key,
                id,
            };
            let outcome = inner
                .run_cold_path(&location, &cancel, &guard.key, guard.id)
                .await;
            if let Err(e) = &outcome {
                tracing::error!("Training for {} failed: {}", location, e);
            }
            guard.complete(outcome);
        });

        result_rx
    }

    async fn run_cold_path(
        &self,
        location: &Location,
        cancel: &CancellationToken,
        key: &str,
        id: u64,
    ) -> ReportResult {
        let report = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PredictError::Cancelled),
            report = self.fetch_and_fit(location) => report?,
        };

        if cancel.is_cancelled() {
            return Err(PredictError::Cancelled);
        }

        if let Some(entry) = self.take_unless_persisting(key, id) {
            tracing::info!("Model for {} fitted, not stored", location);
            let _ = entry.result_tx.send(Ok(report.clone()));
            return Ok(report);
        }

        tracing::info!("Storing model for {}", location);
        let model = report.prediction.model;
        let store = Arc::clone(&self.store);
        let stored_location = location.clone();
        tokio::task::spawn_blocking(move || store.put(&stored_location, &model))
            .await
            .map_err(store_task_failed)??;

        self.remember(location, model);
        Ok(report)
    }

    async fn fetch_and_fit(&self, location: &Location) -> ReportResult {
        let window_days = self.config.archive_window_days;
        let window = ArchiveWindow::ending_yesterday(self.clock.today_utc(), window_days)
            .ok_or_else(|| {
                PredictError::InsufficientData(format!(
                    "archive window of {} days is out of range",
                    window_days
                ))
            })?;
        tracing::info!(
            "Fetching historical data {} to {}",
            window.start_date,
            window.end_date
        );
        let series = self.archive.fetch_hourly(location, window).await?;

        let points = aggregate_daily(&series, self.config.temperature_bounds_f)?;
        let summary = summarize(&points);
        if let Some(s) = &summary {
            tracing::info!(
                "Aggregated {} days ({} to {}) - min: {:.1}°F, max: {:.1}°F, avg: {:.1}°F",
                s.count,
                s.first_date,
                s.last_date,
                s.min_f,
                s.max_f,
                s.mean_f
            );
        }

        let model = regression::fit(&points, self.clock.now())?;

        Ok(TrainingReport {
            window,
            hourly_samples: series.len(),
            summary,
            prediction: self.evaluate(model, PredictionSource::Trained),
        })
    }

    /// Unregister the request unless a caller asked for its model to be stored.
    ///
    /// Runs under the registry lock, so a prediction joining later starts a
    /// new request instead of relying on this one to store.
    fn take_unless_persisting(&self, key: &str, id: u64) -> Option<InFlight> {
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(key)
            .is_some_and(|entry| entry.id == id && !entry.persist)
        {
            in_flight.remove(key)
        } else {
            None
        }
    }

    fn take_in_flight(&self, key: &str, id: u64) -> Option<InFlight> {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(key).is_some_and(|entry| entry.id == id) {
            in_flight.remove(key)
        } else {
            None
        }
    }
}

async fn receive(mut result_rx: broadcast::Receiver<ReportResult>) -> ReportResult {
    match result_rx.recv().await {
        Ok(result) => result,
        // The task went away without reporting (runtime shutdown or panic).
        Err(_) => Err(PredictError::Cancelled),
    }
}

fn store_task_failed(e: tokio::task::JoinError) -> PredictError {
    PredictError::StoreIo(format!("store task failed: {}", e))
}

/// Unregisters an in-flight request even if its task is aborted.
struct InFlightGuard {
    inner: Arc<Inner>,
    key: String,
    id: u64,
}

impl InFlightGuard {
    fn complete(self, outcome: ReportResult) {
        if let Some(entry) = self.inner.take_in_flight(&self.key, self.id) {
            // No receivers left is fine: every caller may have given up.
            let _ = entry.result_tx.send(outcome);
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.take_in_flight(&self.key, self.id);
    }
}
