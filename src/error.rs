//! Error types.

use thiserror::Error;

/// Failures reported by a [`Transport`](crate::source::Transport).
///
/// These travel through the event channel of a watch, so they are `Clone`
/// and carry messages rather than source errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The database refused access to the path.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Unexpected HTTP status or request failure.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// A frame or response body could not be decoded.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The payload was neither an object nor null.
    #[error("Unexpected payload: expected an object, got {0}")]
    Payload(String),

    /// The database cancelled the watch (e.g. security rules changed).
    #[error("Watch cancelled by server: {0}")]
    Cancelled(String),

    /// The watch ended before delivering a snapshot.
    #[error("Watch closed")]
    Closed,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            TransportError::Connection(err.to_string())
        } else if err.is_decode() {
            TransportError::Parse(err.to_string())
        } else {
            TransportError::Http(err.to_string())
        }
    }
}

/// Crate-level error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The timestamp cannot be represented as a date-time.
    #[error("Invalid timestamp: {0}")]
    Timestamp(String),

    /// A range table is malformed.
    #[error("Invalid range for '{parameter}': {reason}")]
    InvalidRange { parameter: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
