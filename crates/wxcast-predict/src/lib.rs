//! Temperature prediction for wxcast
//!
//! Fetches recent hourly history from the Open-Meteo archive, reduces it to
//! daily means, fits a linear model on day of year and persists it per
//! location so repeated predictions skip the network.

pub mod aggregate;
pub mod archive;
pub mod clock;
pub mod error;
pub mod predictor;
pub mod regression;
pub mod store;
pub mod types;

pub use aggregate::{TemperatureBounds, TrainingSummary};
pub use archive::{ArchiveClient, ArchiveConfig, ArchiveWindow};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ErrorKind, PredictError};
pub use predictor::{Predictor, PredictorConfig, TrainingReport};
pub use store::ModelStore;
pub use types::*;
