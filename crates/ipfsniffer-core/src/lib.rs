//! Core types, codecs, and shared utilities for the IPFSniffer pipeline.
//!
//! This crate provides:
//! - Envelope and payload message types for every pipeline subject (prost)
//! - Binary codec helpers with explicit malformed-payload errors
//! - Bus subject names and DLQ derivation
//! - Deterministic document id derivation
//! - CID extraction/normalization utilities
//! - The content filter applied during DAG traversal
//! - Environment-driven configuration shared by both binaries

mod error;

pub mod cidutil;
pub mod codec;
pub mod config;
pub mod docid;
pub mod filter;
pub mod proto;
pub mod subjects;

pub use error::{Error, Result};

/// Schema version stamped into every envelope.
pub const ENVELOPE_VERSION: i32 = 1;

/// Fresh opaque message id for an envelope.
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current time as RFC3339 with nanoseconds, UTC.
pub fn now_rfc3339() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(new_message_id(), new_message_id());
    }

    #[test]
    fn timestamps_are_rfc3339_utc() {
        let ts = now_rfc3339();
        assert!(ts.ends_with('Z'));
        let parsed = chrono::DateTime::parse_from_rfc3339(&ts).unwrap();
        assert_eq!(parsed.timezone().local_minus_utc(), 0);
    }
}
