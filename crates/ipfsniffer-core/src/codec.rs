//! Binary codec for bus payloads.
//!
//! Thin wrappers around prost so every worker reports malformed payloads the
//! same way: an empty payload and a payload that fails to decode both map to
//! errors for which [`Error::is_malformed`](crate::Error::is_malformed) is
//! true, which is what drives DLQ-and-ack handling.

use crate::{Error, Result};
use prost::Message;

/// Encode a message for publishing.
pub fn encode<M: Message>(msg: &M) -> Result<Vec<u8>> {
    Ok(msg.encode_to_vec())
}

/// Decode an inbound payload.
pub fn decode<M: Message + Default>(bytes: &[u8]) -> Result<M> {
    if bytes.is_empty() {
        return Err(Error::EmptyPayload);
    }
    Ok(M::decode(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{CidDiscovered, CidDiscoveredData, FetchLimits, FetchRequest, TraceContext};

    #[test]
    fn round_trips_an_envelope() {
        let env = CidDiscovered {
            v: 1,
            id: "m-1".into(),
            ts: "2024-01-01T00:00:00.000000000Z".into(),
            trace: Some(TraceContext {
                traceparent: "00-abc-def-01".into(),
                tracestate: String::new(),
            }),
            data: Some(CidDiscoveredData {
                cid_or_path: "bafyroot".into(),
                source: "pubsub".into(),
                source_detail: "fil".into(),
                peer_id: "12D3KooW".into(),
                remote_addrs: vec!["/ip4/1.2.3.4/tcp/4001".into()],
                observed_at: "2024-01-01T00:00:00.000000000Z".into(),
            }),
        };

        let bytes = encode(&env).unwrap();
        let back: CidDiscovered = decode(&bytes).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn empty_payload_is_malformed() {
        let err = decode::<CidDiscovered>(&[]).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let err = decode::<FetchRequest>(&[0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn unknown_fields_are_skipped_on_decode() {
        // A payload carrying only tags the target message does not declare
        // decodes to the default message: unknown fields are skipped. This is
        // the forward-compat property the envelope relies on.
        let data = CidDiscoveredData {
            observed_at: "2024-01-01T00:00:00Z".into(),
            ..Default::default()
        };
        let bytes = encode(&data).unwrap();
        let decoded: FetchLimits = decode(&bytes).unwrap();
        assert_eq!(decoded, FetchLimits::default());
    }
}
