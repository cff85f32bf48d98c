//! Common error types for the Myco nowcast service

use thiserror::Error;

/// Common result type for nowcast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared across the service.
///
/// Query-path callers need to distinguish "narrow your request"
/// (`CapacityExceeded`) from "data not ready yet" (`DataUnavailable`) from a
/// rejected input (`Validation`), so each is its own variant rather than a
/// generic failure.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or out-of-window input to the merge path; rejected atomically
    #[error("Validation error: {0}")]
    Validation(String),

    /// Query candidate set exceeds the configured cell cap
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Requested resolution/region has no coverage (distinct from zero matches)
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a failed operation is worth retrying with backoff.
    ///
    /// Validation and configuration failures are deterministic; retrying the
    /// same stage cannot change the outcome.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Io(_) | Error::Internal(_)
        )
    }
}
