//! Error types for validator-core operations.

use std::path::PathBuf;

/// All errors that can occur in validator-core operations.
///
/// Delivery errors never reach the evaluation path; they are surfaced only to
/// the finalization callers and to the notifier worker, which log them.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Configuration invalid: {0}")]
    ConfigInvalid(String),

    // ─────────────────────────────────────────────────────────────────────
    // Store Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("No summary tracked for project: {0}")]
    MissingSummary(String),

    // ─────────────────────────────────────────────────────────────────────
    // Delivery Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("No report destination for project: {0}")]
    DestinationNotFound(String),

    #[error("Delivery failed: {target}: {details}")]
    DeliveryFailed { target: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results using ValidatorError.
pub type Result<T> = std::result::Result<T, ValidatorError>;
