//! Consumer side of the chunk side-channel.
//!
//! Turns a chunk subscription into a byte stream: payloads are decoded,
//! concatenated in delivery order (the transport is in-order for the single
//! subscriber), and the stream ends at the terminal chunk. A terminal with a
//! non-empty error surfaces as an I/O error so downstream readers abort.

use bytes::Bytes;
use futures::Stream;

use ipfsniffer_core::codec;
use ipfsniffer_core::proto::StreamChunk;

use crate::bus::Subscription;

fn stream_error(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, msg)
}

/// Byte stream over incoming chunks. Suitable for `reqwest::Body::wrap_stream`.
pub fn chunk_stream(
    sub: Box<dyn Subscription>,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send {
    futures::stream::unfold((sub, false), |(mut sub, done)| async move {
        if done {
            return None;
        }
        loop {
            let Some(payload) = sub.next().await else {
                return Some((Err(stream_error("chunk subscription closed".into())), (sub, true)));
            };
            let chunk: StreamChunk = match codec::decode(&payload) {
                Ok(chunk) => chunk,
                Err(err) => {
                    return Some((Err(stream_error(format!("chunk decode: {err}"))), (sub, true)));
                }
            };
            let Some(data) = chunk.data else { continue };

            if !data.error.is_empty() {
                return Some((Err(stream_error(format!("stream error: {}", data.error))), (sub, true)));
            }
            if data.eof {
                return None;
            }
            if data.data.is_empty() {
                continue;
            }
            return Some((Ok(Bytes::from(data.data)), (sub, false)));
        }
    })
}
