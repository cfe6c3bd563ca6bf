//! Centralized error types for wxcast.
//!
//! Every failure surfaced by the CLI converts into [`AppError`], which keeps
//! the full context for logging and offers `user_message()` for display.

use thiserror::Error;
use wxcast_predict::{LocationError, PredictError};

/// Top-level application error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Prediction error: {0}")]
    Prediction(#[from] PredictError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid location: {0}")]
    Location(#[from] LocationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Returns a user-friendly message suitable for display.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Prediction(e) => e.user_message(),
            AppError::Config(e) => e.user_message(),
            AppError::Location(_) => "Location details are invalid. Check name and coordinates.",
            AppError::Io(_) => "A file operation failed. Please try again.",
            AppError::Other(_) => "An unexpected error occurred. Please try again.",
        }
    }

    /// Whether running the same command again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Prediction(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),

    #[error("Unknown location: {0}")]
    UnknownLocation(String),

    #[error("Location already exists: {0}")]
    DuplicateLocation(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
            ConfigError::UnknownLocation(_) => {
                "That location is not in the list. Add it first."
            }
            ConfigError::DuplicateLocation(_) => "That location is already in the list.",
        }
    }
}
