//! Error types for issuewatch.

use thiserror::Error;

/// Failure of a feed source call.
///
/// Both kinds are handled the same way by the scheduler: the feed is skipped
/// for the current tick and retried on the next one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network error, server error or rate limiting.
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Feed not found, access denied or an unparseable response.
    #[error("permanent fetch error: {0}")]
    Permanent(String),
}

impl FetchError {
    /// Whether the failure is expected to go away on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Failure to deliver one notification to one subscriber.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The transport refused the message (blocked bot, unknown chat, ...).
    #[error("notification rejected: {0}")]
    Rejected(String),

    /// The transport could not be reached.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Common error type for issuewatch.
#[derive(Error, Debug)]
pub enum WatchError {
    /// Database error.
    ///
    /// Errors from sqlx and from (de)serializing stored columns are converted
    /// into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// Database connection error.
    #[error("database connection error: {0}")]
    DatabaseConnection(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for WatchError {
    fn from(e: sqlx::Error) -> Self {
        WatchError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for WatchError {
    fn from(e: serde_json::Error) -> Self {
        WatchError::Database(format!("column encoding: {e}"))
    }
}

/// Result type alias for issuewatch operations.
pub type Result<T> = std::result::Result<T, WatchError>;
