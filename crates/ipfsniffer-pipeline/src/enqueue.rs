//! Fetch-enqueue worker: turns discovered identifiers into fetch jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ipfsniffer_core::cidutil;
use ipfsniffer_core::config::FetchConfig;
use ipfsniffer_core::proto::{
    CidDiscovered, FetchContent, FetchLimits, FetchPolicy, FetchRequest, FetchRequestData,
    TraceContext,
};
use ipfsniffer_core::{codec, new_message_id, now_rfc3339, subjects, ENVELOPE_VERSION};

use crate::bus::{self, Bus};
use crate::dedupe::{Dedupe, DedupeStore};
use crate::Result;

const PULL_WAIT: Duration = Duration::from_secs(1);

/// Consumes `cid.discovered`, decides fetchability, emits `fetch.request`.
pub struct FetchEnqueuer {
    pub bus: Arc<dyn Bus>,
    pub store: Arc<dyn DedupeStore>,

    pub durable: String,
    pub dedupe: Dedupe,

    /// Defaults stamped into every fetch job.
    pub fetch: FetchConfig,
    pub inline_max_bytes: i64,
}

impl FetchEnqueuer {
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(subject = subjects::CID_DISCOVERED, durable = %self.durable, "fetch enqueuer started");

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
                    error!(%err, "handle discovered");
                }
            }
        }
    }

    pub async fn handle(&self, payload: &[u8]) -> Result<()> {
        let inbound: CidDiscovered = codec::decode(payload)?;
        let Some(d) = inbound.data else { return Ok(()) };

        // Datastore-level DHT sniffing yields both fetchable provider
        // records and internal bookkeeping (IPNS routing keys, peer public
        // keys). Admit provider records only.
        if d.source == "dht" && d.source_detail.starts_with("datastore_") {
            let provider = d.source_detail.contains(":providers")
                || d.source_detail.contains(":provider");
            if !provider {
                debug!(detail = %d.source_detail, "dropping internal DHT bookkeeping");
                return Ok(());
            }
        }

        let cand = d.cid_or_path.trim();
        if cand.is_empty() {
            return Ok(());
        }
        let Some((root, path)) = cidutil::normalize_fetch_target(cand) else {
            debug!(%cand, "not a fetch target");
            return Ok(());
        };

        // Per-target dedup: hot CIDs would otherwise enqueue unbounded work.
        if self
            .dedupe
            .seen(self.store.as_ref(), &format!("{root}:{path}"))
            .await?
        {
            return Ok(());
        }

        info!(%root, %path, "enqueuing fetch request");
        self.enqueue(inbound.trace, &root, &path, &d.observed_at).await
    }

    async fn enqueue(
        &self,
        trace: Option<TraceContext>,
        root: &str,
        path: &str,
        observed_at: &str,
    ) -> Result<()> {
        let env = FetchRequest {
            v: ENVELOPE_VERSION,
            id: new_message_id(),
            ts: now_rfc3339(),
            trace,
            data: Some(FetchRequestData {
                root_cid: root.to_string(),
                path: path.to_string(),
                observed_at: observed_at.to_string(),
                limits: Some(FetchLimits {
                    max_total_bytes: self.fetch.max_total_bytes,
                    max_file_bytes: self.fetch.max_file_bytes,
                    max_dag_nodes: self.fetch.max_dag_nodes,
                    max_depth: self.fetch.max_depth,
                    timeout_ms: self.fetch.timeout.as_millis() as i64,
                }),
                policy: Some(FetchPolicy {
                    skip_ext: self.fetch.skip_ext.clone(),
                    skip_mime_prefix: self.fetch.skip_mime_prefix.clone(),
                }),
                content: Some(FetchContent { inline_max_bytes: self.inline_max_bytes }),
            }),
        };

        let payload = codec::encode(&env)?;
        if let Err(err) = bus::publish(self.bus.as_ref(), subjects::FETCH_REQUEST, &payload).await {
            let _ = bus::publish_dlq(self.bus.as_ref(), subjects::FETCH_REQUEST, &payload).await;
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipfsniffer_core::proto::CidDiscoveredData;

    use crate::bus::MemoryBus;
    use crate::dedupe::{MemoryDedupeStore, DEFAULT_TTL, SEEN_FETCH_PREFIX};

    fn fetch_config() -> FetchConfig {
        FetchConfig {
            max_total_bytes: 100 * 1024 * 1024,
            max_file_bytes: 10 * 1024 * 1024,
            max_dag_nodes: 200_000,
            max_depth: 64,
            timeout: Duration::from_secs(600),
            inline_max_bytes: 256 * 1024,
            skip_ext: vec![".zip".into()],
            skip_mime_prefix: vec!["video/".into()],
        }
    }

    fn enqueuer(bus: &MemoryBus) -> FetchEnqueuer {
        FetchEnqueuer {
            bus: Arc::new(bus.clone()),
            store: Arc::new(MemoryDedupeStore::new()),
            durable: "enqueue-fetch".into(),
            dedupe: Dedupe::new(SEEN_FETCH_PREFIX, DEFAULT_TTL),
            fetch: fetch_config(),
            inline_max_bytes: 256 * 1024,
        }
    }

    fn discovered(cid_or_path: &str, source: &str, detail: &str) -> Vec<u8> {
        let env = CidDiscovered {
            v: ENVELOPE_VERSION,
            id: new_message_id(),
            ts: now_rfc3339(),
            trace: Some(TraceContext { traceparent: "00-t-s-01".into(), tracestate: String::new() }),
            data: Some(CidDiscoveredData {
                cid_or_path: cid_or_path.to_string(),
                source: source.to_string(),
                source_detail: detail.to_string(),
                peer_id: String::new(),
                remote_addrs: Vec::new(),
                observed_at: now_rfc3339(),
            }),
        };
        codec::encode(&env).unwrap()
    }

    fn requests(bus: &MemoryBus) -> Vec<FetchRequestData> {
        bus.published(subjects::FETCH_REQUEST)
            .iter()
            .map(|b| {
                let env: FetchRequest = codec::decode(b).unwrap();
                env.data.unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn bare_cids_become_fetch_requests_with_defaults() {
        let bus = MemoryBus::new();
        let w = enqueuer(&bus);

        w.handle(&discovered("bafyroot", "pubsub", "fil")).await.unwrap();

        let out = requests(&bus);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].root_cid, "bafyroot");
        assert_eq!(out[0].path, "/ipfs/bafyroot");
        let limits = out[0].limits.clone().unwrap();
        assert_eq!(limits.max_dag_nodes, 200_000);
        assert_eq!(limits.timeout_ms, 600_000);
        assert_eq!(out[0].content.clone().unwrap().inline_max_bytes, 256 * 1024);
        assert_eq!(out[0].policy.clone().unwrap().skip_ext, vec![".zip"]);
    }

    #[tokio::test]
    async fn trace_context_is_carried_into_the_request() {
        let bus = MemoryBus::new();
        let w = enqueuer(&bus);
        w.handle(&discovered("/ipfs/bafyroot/sub", "dht", "provider_add")).await.unwrap();

        let envs: Vec<FetchRequest> = bus
            .published(subjects::FETCH_REQUEST)
            .iter()
            .map(|b| codec::decode(b).unwrap())
            .collect();
        assert_eq!(envs[0].trace.as_ref().unwrap().traceparent, "00-t-s-01");
    }

    #[tokio::test]
    async fn internal_dht_bookkeeping_is_dropped() {
        let bus = MemoryBus::new();
        let w = enqueuer(&bus);

        // IPNS routing keys and peer keys observed at the datastore never
        // become fetch jobs.
        w.handle(&discovered("bafyroot", "dht", "datastore_put:routing_key")).await.unwrap();
        w.handle(&discovered("bafyroot", "dht", "datastore_get:pk")).await.unwrap();
        assert!(requests(&bus).is_empty());

        // Provider records are admitted.
        w.handle(&discovered("bafyroot", "dht", "datastore_put:providers")).await.unwrap();
        assert_eq!(requests(&bus).len(), 1);
    }

    #[tokio::test]
    async fn ipns_paths_and_junk_are_dropped() {
        let bus = MemoryBus::new();
        let w = enqueuer(&bus);

        w.handle(&discovered("/ipns/k51name", "ipns-dht", "routing_key")).await.unwrap();
        w.handle(&discovered("not-a-cid", "pubsub", "fil")).await.unwrap();
        w.handle(&discovered("", "pubsub", "fil")).await.unwrap();

        assert!(requests(&bus).is_empty());
    }

    #[tokio::test]
    async fn targets_are_deduped_within_the_window() {
        let bus = MemoryBus::new();
        let w = enqueuer(&bus);

        w.handle(&discovered("bafyroot", "pubsub", "fil")).await.unwrap();
        w.handle(&discovered("bafyroot", "dht", "provider_add")).await.unwrap();
        assert_eq!(requests(&bus).len(), 1, "same (root, path) enqueued once");

        // A different subpath is a different target.
        w.handle(&discovered("/ipfs/bafyroot/sub", "pubsub", "fil")).await.unwrap();
        assert_eq!(requests(&bus).len(), 2);
    }
}
