//! Error types for the search-engine client.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the search-engine client.
#[derive(Error, Debug)]
pub enum Error {
    /// The caller supplied parameters the engine should never see.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Transport-level failure talking to the engine.
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// The engine answered with a non-success status for the whole request.
    #[error("engine status {0}")]
    Status(u16),

    /// Response body did not parse.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Bulk response item count did not match the request.
    #[error("bulk items mismatch: got {got} want {want}")]
    BulkMismatch { got: usize, want: usize },

    /// Client misconfiguration (empty index name, bad base url).
    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// True for errors caused by caller input rather than the backend.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Error::BadRequest(_))
    }
}
