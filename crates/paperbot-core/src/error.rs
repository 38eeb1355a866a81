//! Error types for paperbot.

use thiserror::Error;

/// Result type alias using paperbot's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for paperbot operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Paper source request failed (network or upstream hiccup, retried with backoff)
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Seen-paper store could not read or durably write its state
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A single chat message could not be delivered
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the scheduler should retry the cycle after a backoff delay.
    ///
    /// Only upstream fetch failures are transient. Store failures abort the
    /// cycle, dispatch failures are reported per item and never retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Fetch(_))
    }

    /// Short stable label for structured logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Fetch(_) => "fetch",
            Error::StoreUnavailable(_) => "store_unavailable",
            Error::Dispatch(_) => "dispatch",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::InvalidInput(_) => "invalid_input",
            Error::Internal(_) => "internal",
            Error::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
