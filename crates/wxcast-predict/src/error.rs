//! Prediction error types.
//!
//! Every component reports its own kind and the predictor forwards it
//! unchanged. Errors are `Clone` because one cold-path result is shared by
//! every caller folded into the same in-flight request.

use std::fmt;

use thiserror::Error;

/// Disjoint categories of prediction failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    RemoteStatus,
    MalformedResponse,
    InsufficientData,
    DegenerateFit,
    StoreIo,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "NETWORK",
            Self::RemoteStatus => "REMOTE_STATUS",
            Self::MalformedResponse => "MALFORMED_RESPONSE",
            Self::InsufficientData => "INSUFFICIENT_DATA",
            Self::DegenerateFit => "DEGENERATE_FIT",
            Self::StoreIo => "STORE_IO",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {status}{}", format_body(.body))]
    RemoteStatus { status: u16, body: String },

    #[error("Malformed archive response: {0}")]
    MalformedResponse(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Degenerate fit: {0}")]
    DegenerateFit(String),

    #[error("Model store error: {0}")]
    StoreIo(String),

    #[error("Prediction cancelled")]
    Cancelled,
}

fn format_body(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(" - {}", body)
    }
}

impl PredictError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::RemoteStatus { .. } => ErrorKind::RemoteStatus,
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Self::InsufficientData(_) => ErrorKind::InsufficientData,
            Self::DegenerateFit(_) => ErrorKind::DegenerateFit,
            Self::StoreIo(_) => ErrorKind::StoreIo,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Short message suitable for showing next to the prediction button.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Network(_) => "Unable to reach the weather archive. Check your connection.",
            Self::RemoteStatus { status, .. } if *status >= 500 => {
                "The weather archive is having trouble. Please try again later."
            }
            Self::RemoteStatus { .. } => "The weather archive rejected the request.",
            Self::MalformedResponse(_) => "Received unexpected data from the weather archive.",
            Self::InsufficientData(_) => "Not enough historical data to make a prediction.",
            Self::DegenerateFit(_) => "Could not build a prediction model from the data.",
            Self::StoreIo(_) => "Unable to access saved prediction models.",
            Self::Cancelled => "Prediction was cancelled.",
        }
    }

    /// Whether the caller may reasonably try again. The core itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::RemoteStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for PredictError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PredictError::Network(format!("request timed out: {}", e))
        } else if let Some(status) = e.status() {
            PredictError::RemoteStatus {
                status: status.as_u16(),
                body: String::new(),
            }
        } else if e.is_decode() {
            PredictError::MalformedResponse(e.to_string())
        } else {
            PredictError::Network(e.to_string())
        }
    }
}

impl From<rusqlite::Error> for PredictError {
    fn from(e: rusqlite::Error) -> Self {
        PredictError::StoreIo(e.to_string())
    }
}
