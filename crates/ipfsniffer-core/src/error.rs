//! Error types shared across the IPFSniffer crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the core codecs and utilities.
#[derive(Error, Debug)]
pub enum Error {
    /// An inbound bus payload was empty.
    #[error("empty payload")]
    EmptyPayload,

    /// An inbound bus payload did not decode as the expected message.
    #[error("proto decode: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Outbound message encoding failed.
    #[error("proto encode: {0}")]
    Encode(#[from] prost::EncodeError),

    /// A configuration value could not be used.
    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// True when the payload itself is broken and retrying cannot help.
    ///
    /// Workers use this to decide between DLQ-and-ack and leaving the
    /// message for redelivery.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::EmptyPayload | Error::Decode(_))
    }
}
