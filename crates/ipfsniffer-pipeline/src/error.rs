//! Error types for the pipeline workers.

use thiserror::Error;

use crate::node::NodeError;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running pipeline workers.
#[derive(Error, Debug)]
pub enum Error {
    /// Payload encode/decode failure.
    #[error("codec: {0}")]
    Codec(#[from] ipfsniffer_core::Error),

    /// Message bus failure.
    #[error("bus: {0}")]
    Bus(String),

    /// Dedup store failure.
    #[error("dedupe: {0}")]
    Dedupe(String),

    /// Peer node failure.
    #[error("node: {0}")]
    Node(#[from] NodeError),

    /// Search-engine client failure.
    #[error("index: {0}")]
    Index(#[from] ipfsniffer_index::Error),

    /// Text extraction failure.
    #[error("extract: {0}")]
    Extract(String),

    /// Outbound HTTP failure.
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// Content stream failure.
    #[error("stream: {0}")]
    Stream(String),

    /// Document serialization failure.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Worker misconfiguration.
    #[error("config: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the inbound payload is broken and should be DLQ'd rather
    /// than retried.
    pub fn is_malformed_payload(&self) -> bool {
        matches!(self, Error::Codec(inner) if inner.is_malformed())
    }
}
