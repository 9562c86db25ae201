//! Error types for the doclink client library.
//!
//! One enum covers the whole crate. The split that matters to callers:
//!
//! - [`DocLinkError::Decode`] is non-fatal in batch contexts — batch decoding
//!   silently drops the offending document and keeps going. It only surfaces
//!   from single-document operations such as
//!   [`get_one`](crate::DocLinkClient::get_one).
//! - Everything else is fatal to the operation (or terminal to the
//!   subscription) that produced it.
//!
//! There is no retry logic anywhere in this crate; retry policy belongs to
//! the backend client or the calling application.

use thiserror::Error;

/// Errors returned by doclink operations.
#[derive(Error, Debug)]
pub enum DocLinkError {
    /// The requested document does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A document payload did not match the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The backend could not be reached or the connection failed mid-flight.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend rejected the request.
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// A WebSocket-level failure on a live query connection.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// An operation exceeded its configured deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A caller-level precondition failed before anything was sent to the
    /// backend.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An atomic multi-path write failed; no partial effects beyond what the
    /// backend's atomicity promises.
    #[error("Write error: {0}")]
    Write(String),

    /// Client-side configuration problem (bad base URL, bad options).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DocLinkError>;

impl From<reqwest::Error> for DocLinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DocLinkError::Timeout(err.to_string())
        } else if err.is_decode() {
            DocLinkError::Decode(err.to_string())
        } else {
            DocLinkError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DocLinkError {
    fn from(err: serde_json::Error) -> Self {
        DocLinkError::Decode(err.to_string())
    }
}
