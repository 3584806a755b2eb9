//! Error types for the admission layer.
//!
//! Admission outcomes (rate limited, invalid payload) are returned as data and
//! never appear here. These errors only surface while building the layer or
//! while moving bytes in and out of the line server.

use thiserror::Error;

/// Main error type for admission setup and I/O.
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Layered configuration loading errors
    #[error("Configuration source error: {0}")]
    Source(#[from] ::config::ConfigError),

    /// Malformed request or response encoding
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for admission operations.
pub type Result<T> = std::result::Result<T, AdmissionError>;
