//! dmsync - direct messaging core
//!
//! This library provides the messaging subsystem of a social feed application:
//! an append-only message store, per-viewer conversation aggregation, paginated
//! history with read receipts, and a poll-based client reconciler that keeps
//! sender and receiver views in sync without a push channel.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod conversation;
pub mod messaging;
pub mod pager;
pub mod protocol;
pub mod storage;
pub mod sync;
pub mod transport;

/// Result type alias for dmsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for dmsync operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input: empty text, self-messaging, malformed id
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced user or record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Viewer identity missing or invalid
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Store unavailable or network failure; safe to retry later
    #[error("Transient error: {0}")]
    Transient(String),

    /// Storage operation error
    #[error("Storage error: {0}")]
    Storage(String),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP/Hyper error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),
}

impl Error {
    /// Whether the failure is recoverable by simply trying again later
    ///
    /// The sync reconciler silently drops ticks that fail with a transient
    /// error; every other class is surfaced to whoever initiated the call.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transient(_) | Error::Database(_) | Error::Io(_) | Error::Http(_)
        )
    }

    /// The message without the error-class prefix
    pub fn detail(&self) -> String {
        match self {
            Error::Validation(msg)
            | Error::NotFound(msg)
            | Error::Authorization(msg)
            | Error::Transient(msg)
            | Error::Storage(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

/// Initialize logging for dmsync binaries
pub fn init() {
    tracing_subscriber::fmt::init();
}

#[cfg(test)]
mod tests;
