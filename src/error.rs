//! Error types for the Tollgate engine.

use thiserror::Error;

/// Main error type for Tollgate operations.
///
/// Construction and configuration loading are the only fallible surfaces;
/// per-request admission decisions always produce a plain verdict.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
