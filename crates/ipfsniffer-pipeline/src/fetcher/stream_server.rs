//! Stream server: serves bulk file bytes over the chunk side-channel.
//!
//! The requester allocates a stream id, subscribes to
//! `stream.chunk.<stream_id>`, then publishes a `StreamGet`. The server
//! resolves the target, streams chunks with strictly increasing `seq`, and
//! always terminates the sequence with exactly one `eof=true` or
//! `error!=""` message.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ipfsniffer_core::proto::{StreamChunk, StreamChunkData, StreamGet, TraceContext};
use ipfsniffer_core::{codec, new_message_id, now_rfc3339, subjects, ENVELOPE_VERSION};

use crate::bus::{self, Bus};
use crate::node::PeerNode;
use crate::{Error, Result};

const PULL_WAIT: Duration = Duration::from_secs(2);

/// Default chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;
/// Cap applied when a request carries no limit of its own.
pub const DEFAULT_MAX_BYTES: i64 = 10 * 1024 * 1024;

pub struct StreamServer {
    pub node: Arc<dyn PeerNode>,
    pub bus: Arc<dyn Bus>,

    pub durable: String,
    pub chunk_size: usize,
    /// Fallback for requests with `max_bytes <= 0`.
    pub default_max_bytes: i64,
}

impl StreamServer {
    pub fn new(node: Arc<dyn PeerNode>, bus: Arc<dyn Bus>) -> StreamServer {
        StreamServer {
            node,
            bus,
            durable: "stream-server".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            default_max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(subject = subjects::STREAM_GET, durable = %self.durable, "stream server started");

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                delivery = self.bus.pull(subjects::STREAM_GET, &self.durable, PULL_WAIT) => delivery?,
            };
            let Some(delivery) = delivery else { continue };

            match self.handle(&delivery.payload).await {
                Ok(()) => {
                    if let Err(err) = delivery.ack().await {
                        warn!(%err, "ack failed");
                    }
                }
                Err(err) if err.is_malformed_payload() => {
                    warn!(%err, "malformed stream request, dead-lettering");
                    let _ =
                        bus::publish_dlq(self.bus.as_ref(), subjects::STREAM_GET, &delivery.payload)
                            .await;
                    let _ = delivery.ack().await;
                }
                Err(err) => {
                    error!(%err, "handle stream request");
                }
            }
        }
    }

    pub async fn handle(&self, payload: &[u8]) -> Result<()> {
        let req: StreamGet = codec::decode(payload)?;
        let Some(data) = req.data else { return Ok(()) };

        if data.stream_id.is_empty() {
            warn!(path = %data.path, "stream request without stream id, dropping");
            return Ok(());
        }
        let chunk_subject = subjects::stream_chunk_subject(&data.stream_id);

        let max_bytes = if data.max_bytes > 0 { data.max_bytes } else { self.default_max_bytes };
        let path = if data.path.is_empty() {
            format!("/ipfs/{}", data.root_cid)
        } else {
            data.path.clone()
        };

        let cid = match self.node.resolve_path(&path).await {
            Ok(cid) => cid,
            Err(err) => {
                return self
                    .send_terminal(&req.trace, &chunk_subject, &data.stream_id, 1, &err.to_string())
                    .await;
            }
        };
        let mut reader = match self.node.dag().open_file(&cid).await {
            Ok(reader) => reader,
            Err(err) => {
                return self
                    .send_terminal(&req.trace, &chunk_subject, &data.stream_id, 1, &err.to_string())
                    .await;
            }
        };

        let mut sent: i64 = 0;
        let mut seq: i64 = 0;
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            if sent >= max_bytes {
                return self
                    .send_terminal(&req.trace, &chunk_subject, &data.stream_id, seq + 1, "")
                    .await;
            }

            let want = (self.chunk_size as i64).min(max_bytes - sent) as usize;
            match reader.read(&mut buf[..want]).await {
                Ok(0) => {
                    return self
                        .send_terminal(&req.trace, &chunk_subject, &data.stream_id, seq + 1, "")
                        .await;
                }
                Ok(n) => {
                    seq += 1;
                    sent += n as i64;
                    self.send_chunk(&req.trace, &chunk_subject, &data.stream_id, seq, &buf[..n])
                        .await?;
                }
                Err(err) => {
                    return self
                        .send_terminal(
                            &req.trace,
                            &chunk_subject,
                            &data.stream_id,
                            seq + 1,
                            &err.to_string(),
                        )
                        .await;
                }
            }
        }
    }

    async fn send_chunk(
        &self,
        trace: &Option<TraceContext>,
        subject: &str,
        stream_id: &str,
        seq: i64,
        data: &[u8],
    ) -> Result<()> {
        self.publish_chunk(trace, subject, StreamChunkData {
            stream_id: stream_id.to_string(),
            seq,
            data: data.to_vec(),
            eof: false,
            error: String::new(),
        })
        .await
    }

    /// Terminal message: `eof=true`, possibly with an error.
    async fn send_terminal(
        &self,
        trace: &Option<TraceContext>,
        subject: &str,
        stream_id: &str,
        seq: i64,
        error: &str,
    ) -> Result<()> {
        self.publish_chunk(trace, subject, StreamChunkData {
            stream_id: stream_id.to_string(),
            seq,
            data: Vec::new(),
            eof: true,
            error: error.to_string(),
        })
        .await
    }

    async fn publish_chunk(
        &self,
        trace: &Option<TraceContext>,
        subject: &str,
        data: StreamChunkData,
    ) -> Result<()> {
        let env = StreamChunk {
            v: ENVELOPE_VERSION,
            id: new_message_id(),
            ts: now_rfc3339(),
            trace: trace.clone(),
            data: Some(data),
        };
        let payload = codec::encode(&env)?;
        bus::publish(self.bus.as_ref(), subject, &payload)
            .await
            .map_err(|err| Error::Stream(format!("publish chunk: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::node::memory::{MemoryDag, MemoryNode};
    use ipfsniffer_core::proto::StreamGetData;

    fn stream_get(stream_id: &str, root: &str, path: &str, max_bytes: i64) -> Vec<u8> {
        let req = StreamGet {
            v: ENVELOPE_VERSION,
            id: new_message_id(),
            ts: now_rfc3339(),
            trace: None,
            data: Some(StreamGetData {
                stream_id: stream_id.to_string(),
                root_cid: root.to_string(),
                path: path.to_string(),
                max_bytes,
            }),
        };
        codec::encode(&req).unwrap()
    }

    fn chunks(bus: &MemoryBus, stream_id: &str) -> Vec<StreamChunkData> {
        bus.published(&subjects::stream_chunk_subject(stream_id))
            .iter()
            .map(|b| {
                let env: StreamChunk = codec::decode(b).unwrap();
                env.data.unwrap()
            })
            .collect()
    }

    fn server(dag: Arc<MemoryDag>, bus: &MemoryBus) -> StreamServer {
        StreamServer::new(Arc::new(MemoryNode::new(dag)), Arc::new(bus.clone()))
    }

    #[tokio::test]
    async fn streams_a_file_in_chunks_with_trailing_eof() {
        let dag = Arc::new(MemoryDag::new());
        // 80 KiB file, 32 KiB chunks: 32768 + 32768 + 16384, then eof.
        let file = dag.add_file(&vec![0xabu8; 80 * 1024]);
        let bus = MemoryBus::new();
        let server = server(Arc::clone(&dag), &bus);

        let payload = stream_get("s1", &file.to_string(), &format!("/ipfs/{file}"), 10 * 1024 * 1024);
        server.handle(&payload).await.unwrap();

        let got = chunks(&bus, "s1");
        assert_eq!(got.len(), 4);
        assert_eq!(got[0].seq, 1);
        assert_eq!(got[0].data.len(), 32 * 1024);
        assert_eq!(got[1].seq, 2);
        assert_eq!(got[1].data.len(), 32 * 1024);
        assert_eq!(got[2].seq, 3);
        assert_eq!(got[2].data.len(), 16 * 1024);
        assert!(got[..3].iter().all(|c| !c.eof && c.error.is_empty()));

        let terminal = &got[3];
        assert_eq!(terminal.seq, 4);
        assert!(terminal.eof);
        assert!(terminal.data.is_empty());
        assert!(terminal.error.is_empty());
    }

    #[tokio::test]
    async fn max_bytes_caps_the_stream() {
        let dag = Arc::new(MemoryDag::new());
        let file = dag.add_file(&vec![1u8; 100 * 1024]);
        let bus = MemoryBus::new();
        let server = server(Arc::clone(&dag), &bus);

        let payload = stream_get("s2", &file.to_string(), &format!("/ipfs/{file}"), 40 * 1024);
        server.handle(&payload).await.unwrap();

        let got = chunks(&bus, "s2");
        let sent: usize = got.iter().map(|c| c.data.len()).sum();
        assert_eq!(sent, 40 * 1024);
        assert!(got.last().unwrap().eof);
    }

    #[tokio::test]
    async fn non_positive_max_bytes_falls_back_to_the_default_cap() {
        let dag = Arc::new(MemoryDag::new());
        let file = dag.add_file(b"small body");
        let bus = MemoryBus::new();
        let server = server(Arc::clone(&dag), &bus);

        let payload = stream_get("s3", &file.to_string(), &format!("/ipfs/{file}"), 0);
        server.handle(&payload).await.unwrap();

        let got = chunks(&bus, "s3");
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].data, b"small body".to_vec());
        assert!(got[1].eof);
    }

    #[tokio::test]
    async fn unresolvable_target_yields_one_error_terminal() {
        let dag = Arc::new(MemoryDag::new());
        let bus = MemoryBus::new();
        let server = server(dag, &bus);

        let missing = "bafkreibm6jg3ux5qumhcn2b3flc3tyu6dmlb4xa7u5bf44yegnrjhc4yeq";
        let payload = stream_get("s4", missing, &format!("/ipfs/{missing}/nope"), 1024);
        server.handle(&payload).await.unwrap();

        let got = chunks(&bus, "s4");
        assert_eq!(got.len(), 1);
        assert!(got[0].eof);
        assert!(!got[0].error.is_empty());
        assert_eq!(got[0].seq, 1);
    }

    #[tokio::test]
    async fn requests_without_stream_id_are_dropped() {
        let dag = Arc::new(MemoryDag::new());
        let file = dag.add_file(b"x");
        let bus = MemoryBus::new();
        let server = server(Arc::clone(&dag), &bus);

        let payload = stream_get("", &file.to_string(), &format!("/ipfs/{file}"), 1024);
        server.handle(&payload).await.unwrap();
        assert!(bus.published(&subjects::stream_chunk_subject("")).is_empty());
    }

    #[tokio::test]
    async fn directories_are_not_streamable() {
        let dag = Arc::new(MemoryDag::new());
        let file = dag.add_file(b"f");
        let dir = dag.add_dir(&[("f", file)]);
        let bus = MemoryBus::new();
        let server = server(Arc::clone(&dag), &bus);

        let payload = stream_get("s5", &dir.to_string(), &format!("/ipfs/{dir}"), 1024);
        server.handle(&payload).await.unwrap();

        let got = chunks(&bus, "s5");
        assert_eq!(got.len(), 1);
        assert!(got[0].eof);
        assert!(got[0].error.contains("not a file"));
    }
}
