//! IPNS resolver worker.
//!
//! The only stage that converts `/ipns/...` entries into fetchable
//! `/ipfs/...` targets; the rest of the pipeline ignores IPNS paths.
//! Resolutions are republished to `cid.discovered` without dedup; the
//! fetch-enqueuer's dedup bounds the amplification.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ipfsniffer_core::proto::{CidDiscovered, CidDiscoveredData};
use ipfsniffer_core::{codec, new_message_id, now_rfc3339, subjects, ENVELOPE_VERSION};

use crate::bus::{self, Bus};
use crate::node::PeerNode;
use crate::Result;

const PULL_WAIT: Duration = Duration::from_secs(2);

pub struct IpnsResolverWorker {
    pub node: Arc<dyn PeerNode>,
    pub bus: Arc<dyn Bus>,

    pub durable: String,
}

impl IpnsResolverWorker {
    pub fn new(node: Arc<dyn PeerNode>, bus: Arc<dyn Bus>) -> IpnsResolverWorker {
        IpnsResolverWorker { node, bus, durable: "resolver-ipns".to_string() }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(subject = subjects::CID_DISCOVERED, durable = %self.durable, "resolver started");

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                delivery = self.bus.pull(subjects::CID_DISCOVERED, &self.durable, PULL_WAIT) => delivery?,
            };
            let Some(delivery) = delivery else { continue };

            match self.handle(&delivery.payload).await {
                Ok(()) => {
                    if let Err(err) = delivery.ack().await {
                        warn!(%err, "ack failed");
                    }
                }
                Err(err) if err.is_malformed_payload() => {
                    warn!(%err, "malformed cid.discovered, dead-lettering");
                    let _ = bus::publish_dlq(
                        self.bus.as_ref(),
                        subjects::CID_DISCOVERED,
                        &delivery.payload,
                    )
                    .await;
                    let _ = delivery.ack().await;
                }
                Err(err) => {
                    // Resolution is often transiently impossible; leave the
                    // message for redelivery.
                    error!(%err, "handle cid.discovered");
                }
            }
        }
    }

    pub async fn handle(&self, payload: &[u8]) -> Result<()> {
        let inbound: CidDiscovered = codec::decode(payload)?;
        let Some(d) = inbound.data else { return Ok(()) };

        let cand = d.cid_or_path.trim();
        let Some(name) = cand.strip_prefix("/ipns/") else {
            // Everything non-IPNS is passed over.
            return Ok(());
        };

        let resolved = self.node.resolve_name(name).await?;

        let out = CidDiscovered {
            v: ENVELOPE_VERSION,
            id: new_message_id(),
            ts: now_rfc3339(),
            trace: inbound.trace,
            data: Some(CidDiscoveredData {
                cid_or_path: resolved,
                source: "ipns".to_string(),
                source_detail: "resolved".to_string(),
                peer_id: String::new(),
                remote_addrs: Vec::new(),
                observed_at: now_rfc3339(),
            }),
        };

        let payload = codec::encode(&out)?;
        if let Err(err) = bus::publish(self.bus.as_ref(), subjects::CID_DISCOVERED, &payload).await {
            let _ = bus::publish_dlq(self.bus.as_ref(), subjects::CID_DISCOVERED, &payload).await;
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::node::memory::{MemoryDag, MemoryNode};

    fn discovered(cid_or_path: &str, source: &str) -> Vec<u8> {
        let env = CidDiscovered {
            v: ENVELOPE_VERSION,
            id: new_message_id(),
            ts: now_rfc3339(),
            trace: None,
            data: Some(CidDiscoveredData {
                cid_or_path: cid_or_path.to_string(),
                source: source.to_string(),
                source_detail: "test".into(),
                peer_id: String::new(),
                remote_addrs: Vec::new(),
                observed_at: now_rfc3339(),
            }),
        };
        codec::encode(&env).unwrap()
    }

    #[tokio::test]
    async fn resolves_ipns_entries_back_into_the_subject() {
        let node = Arc::new(MemoryNode::new(Arc::new(MemoryDag::new())));
        node.set_name("k51blog", "/ipfs/bafyroot/blog");
        let bus = MemoryBus::new();
        let resolver = IpnsResolverWorker::new(node, Arc::new(bus.clone()));

        resolver.handle(&discovered("/ipns/k51blog", "ipns-dht")).await.unwrap();

        let events = bus.published(subjects::CID_DISCOVERED);
        assert_eq!(events.len(), 1);
        let env: CidDiscovered = codec::decode(&events[0]).unwrap();
        let data = env.data.unwrap();
        assert_eq!(data.cid_or_path, "/ipfs/bafyroot/blog");
        assert_eq!(data.source, "ipns");
        assert_eq!(data.source_detail, "resolved");
    }

    #[tokio::test]
    async fn non_ipns_entries_are_passed_over() {
        let node = Arc::new(MemoryNode::new(Arc::new(MemoryDag::new())));
        let bus = MemoryBus::new();
        let resolver = IpnsResolverWorker::new(node, Arc::new(bus.clone()));

        resolver.handle(&discovered("bafyroot", "pubsub")).await.unwrap();
        resolver.handle(&discovered("/ipfs/bafyroot/x", "dht")).await.unwrap();

        assert!(bus.published(subjects::CID_DISCOVERED).is_empty());
    }

    #[tokio::test]
    async fn unresolvable_names_error_for_redelivery() {
        let node = Arc::new(MemoryNode::new(Arc::new(MemoryDag::new())));
        let bus = MemoryBus::new();
        let resolver = IpnsResolverWorker::new(node, Arc::new(bus.clone()));

        assert!(resolver.handle(&discovered("/ipns/unknown", "ipns-dht")).await.is_err());
        assert!(bus.published(subjects::CID_DISCOVERED).is_empty());
    }
}
