//! Fetcher worker: pulls `fetch.request`, walks the DAG, emits one
//! `fetch.result` per node.

pub mod counting_dag;
pub mod stream_reader;
pub mod stream_server;
pub mod traverse;

pub use counting_dag::CountingDag;
pub use stream_server::StreamServer;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cid::Cid;

use ipfsniffer_core::filter;
use ipfsniffer_core::proto::{FetchRequest, FetchResult, FetchResultData, TraceContext};
use ipfsniffer_core::{codec, new_message_id, now_rfc3339, subjects, ENVELOPE_VERSION};

use crate::bus::{self, Bus};
use crate::node::{NodeError, PeerNode};
use crate::{Error, Result};

use traverse::{limits_from_request, policy_from_request, ResultSink, Traversal};

const PULL_WAIT: Duration = Duration::from_secs(2);

/// Fetcher worker.
pub struct Fetcher {
    pub node: Arc<dyn PeerNode>,
    pub bus: Arc<dyn Bus>,

    pub durable: String,

    /// Bounded retry for the initial resolve; DHT lookups against sniffed
    /// identifiers fail transiently all the time.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Fetcher {
    pub fn new(node: Arc<dyn PeerNode>, bus: Arc<dyn Bus>) -> Fetcher {
        Fetcher {
            node,
            bus,
            durable: "fetcher".to_string(),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(5),
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            subject = subjects::FETCH_REQUEST,
            durable = %self.durable,
            max_retries = self.max_retries,
            "fetcher started"
        );

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                delivery = self.bus.pull(subjects::FETCH_REQUEST, &self.durable, PULL_WAIT) => delivery?,
            };
            let Some(delivery) = delivery else { continue };

            match self.handle(&delivery.payload).await {
                Ok(()) => {
                    if let Err(err) = delivery.ack().await {
                        warn!(%err, "ack failed");
                    }
                }
                Err(err) if err.is_malformed_payload() => {
                    warn!(%err, "malformed fetch request, dead-lettering");
                    let _ =
                        bus::publish_dlq(self.bus.as_ref(), subjects::FETCH_REQUEST, &delivery.payload)
                            .await;
                    let _ = delivery.ack().await;
                }
                Err(err) => {
                    // Left unacked for redelivery.
                    error!(%err, "handle fetch request");
                }
            }
        }
    }

    pub async fn handle(&self, payload: &[u8]) -> Result<()> {
        let req: FetchRequest = codec::decode(payload)?;
        let Some(data) = req.data else { return Ok(()) };

        let root = data.root_cid.clone();
        let path = if data.path.is_empty() {
            format!("/ipfs/{root}")
        } else {
            data.path.clone()
        };

        let limits = limits_from_request(&data);
        let policy = policy_from_request(&data);

        let deadline = (limits_timeout_ms(&data) > 0)
            .then(|| Instant::now() + Duration::from_millis(limits_timeout_ms(&data) as u64));

        // Depth of the requested subpath itself counts against max_depth.
        if limits.max_depth > 0 && path_depth(&path) > limits.max_depth {
            return self
                .emit(
                    req.trace,
                    traverse::skipped_unknown(&root, &path, "path depth exceeded"),
                )
                .await;
        }

        let start = match self.resolve_with_retry(&path, deadline).await {
            Ok(cid) => cid,
            Err(err) => {
                let reason = match err {
                    NodeError::InvalidPath(_) => "invalid_path",
                    _ => "fetch_failed",
                };
                error!(%root, %path, %err, "resolve failed");
                return self
                    .emit(req.trace, failed_result(&root, &path, reason, &err.to_string(), false))
                    .await;
            }
        };

        let counting = CountingDag::new(self.node.dag(), limits.max_dag_nodes);
        let mut traversal = Traversal::new(&counting, &root, limits, policy, deadline);
        let mut sink = BusSink { bus: self.bus.as_ref(), trace: req.trace.clone() };

        match traversal.walk(&path, start, &mut sink).await {
            Ok(()) => Ok(()),
            Err(Error::Node(node_err)) => {
                // Limits and node failures have both been processed as far as
                // they ever will be: emit the terminal record and ack.
                let reason = if node_err.is_limit() { "limit_exceeded" } else { "fetch_failed" };
                debug!(%root, %path, err = %node_err, "traversal stopped");
                self.emit(
                    req.trace,
                    failed_result(&root, &path, reason, &node_err.to_string(), true),
                )
                .await
            }
            // Bus errors propagate: the request is redelivered.
            Err(err) => Err(err),
        }
    }

    async fn resolve_with_retry(
        &self,
        path: &str,
        deadline: Option<Instant>,
    ) -> std::result::Result<Cid, NodeError> {
        let mut attempt = 0u32;
        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(NodeError::Timeout);
                }
            }

            match self.node.resolve_path(path).await {
                Ok(cid) => return Ok(cid),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt >= self.max_retries => return Err(err),
                Err(err) => {
                    attempt += 1;
                    let delay = retry_delay(attempt, self.retry_base_delay, self.retry_max_delay);
                    warn!(%path, %err, attempt, delay_ms = delay.as_millis() as u64, "resolve failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn emit(&self, trace: Option<TraceContext>, data: FetchResultData) -> Result<()> {
        let mut sink = BusSink { bus: self.bus.as_ref(), trace };
        sink.emit(data).await
    }
}

/// Exponential backoff with ±25% jitter.
fn retry_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = base.as_millis().saturating_mul(1u128 << attempt.min(16)) as f64;
    let clamped = exp.min(max.as_millis() as f64);
    let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
    Duration::from_millis((clamped * (1.0 + jitter)).max(0.0) as u64)
}

fn limits_timeout_ms(data: &ipfsniffer_core::proto::FetchRequestData) -> i64 {
    data.limits.as_ref().map_or(0, |l| l.timeout_ms)
}

/// Depth of the subpath below the root: `/ipfs/<cid>/a/b` has depth 2.
fn path_depth(path: &str) -> i64 {
    let path = path.trim();
    if let Some(rest) = path.strip_prefix("/ipfs/") {
        let parts: Vec<&str> = rest.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
        return parts.len().saturating_sub(1) as i64;
    }
    path.trim_matches('/').matches('/').count() as i64
}

fn failed_result(
    root: &str,
    path: &str,
    skip_reason: &str,
    error: &str,
    truncated: bool,
) -> FetchResultData {
    FetchResultData {
        root_cid: root.to_string(),
        path: path.to_string(),
        node_type: "unknown".into(),
        size_bytes: 0,
        mime: String::new(),
        ext: filter::ext_of_path(path),
        content: Some(ipfsniffer_core::proto::FetchContentResult {
            mode: "none".into(),
            inline_base64: String::new(),
        }),
        directory: Some(ipfsniffer_core::proto::FetchDirectory {
            entries: Vec::new(),
            truncated,
        }),
        status: "failed".into(),
        skip_reason: skip_reason.to_string(),
        error: error.to_string(),
        fetched_at: now_rfc3339(),
    }
}

struct BusSink<'a> {
    bus: &'a dyn Bus,
    trace: Option<TraceContext>,
}

#[async_trait]
impl ResultSink for BusSink<'_> {
    async fn emit(&mut self, mut data: FetchResultData) -> Result<()> {
        if data.fetched_at.is_empty() {
            data.fetched_at = now_rfc3339();
        }
        let env = FetchResult {
            v: ENVELOPE_VERSION,
            id: new_message_id(),
            ts: now_rfc3339(),
            trace: self.trace.clone(),
            data: Some(data),
        };
        let payload = codec::encode(&env)?;
        if let Err(err) = bus::publish(self.bus, subjects::FETCH_RESULT, &payload).await {
            let _ = bus::publish_dlq(self.bus, subjects::FETCH_RESULT, &payload).await;
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
    use ipfsniffer_core::proto::{FetchContent, FetchLimits, FetchPolicy, FetchRequestData};

    fn request(root: &str, path: &str) -> FetchRequest {
        FetchRequest {
            v: ENVELOPE_VERSION,
            id: new_message_id(),
            ts: now_rfc3339(),
            trace: Some(TraceContext { traceparent: "00-trace-span-01".into(), tracestate: String::new() }),
            data: Some(FetchRequestData {
                root_cid: root.to_string(),
                path: path.to_string(),
                observed_at: now_rfc3339(),
                limits: Some(FetchLimits {
                    max_total_bytes: 1024 * 1024,
                    max_file_bytes: 1024,
                    max_dag_nodes: 100,
                    max_depth: 8,
                    timeout_ms: 5_000,
                }),
                policy: Some(FetchPolicy { skip_ext: vec![], skip_mime_prefix: vec![] }),
                content: Some(FetchContent { inline_max_bytes: 512 }),
            }),
        }
    }

    fn results(bus: &MemoryBus) -> Vec<FetchResultData> {
        bus.published(subjects::FETCH_RESULT)
            .iter()
            .map(|b| {
                let env: FetchResult = codec::decode(b).unwrap();
                env.data.unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn emits_results_for_the_whole_tree() {
        let dag = Arc::new(MemoryDag::new());
        let file = dag.add_file(b"hello fetcher");
        let root = dag.add_dir(&[("hello.txt", file)]);
        let node = Arc::new(MemoryNode::new(Arc::clone(&dag)));
        let bus = MemoryBus::new();
        let fetcher = Fetcher::new(node, Arc::new(bus.clone()));

        let req = request(&root.to_string(), &format!("/ipfs/{root}"));
        fetcher.handle(&codec::encode(&req).unwrap()).await.unwrap();

        let emitted = results(&bus);
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].node_type, "dir");
        assert_eq!(emitted[1].node_type, "file");
        assert_eq!(emitted[1].status, "ok");
    }

    #[tokio::test]
    async fn trace_context_is_preserved_on_results() {
        let dag = Arc::new(MemoryDag::new());
        let file = dag.add_file(b"traced");
        let node = Arc::new(MemoryNode::new(Arc::clone(&dag)));
        let bus = MemoryBus::new();
        let fetcher = Fetcher::new(node, Arc::new(bus.clone()));

        let req = request(&file.to_string(), &format!("/ipfs/{file}"));
        fetcher.handle(&codec::encode(&req).unwrap()).await.unwrap();

        let envs: Vec<FetchResult> = bus
            .published(subjects::FETCH_RESULT)
            .iter()
            .map(|b| codec::decode(b).unwrap())
            .collect();
        assert_eq!(envs[0].trace.as_ref().unwrap().traceparent, "00-trace-span-01");
    }

    #[tokio::test]
    async fn unresolvable_roots_emit_a_failed_result() {
        let dag = Arc::new(MemoryDag::new());
        let node = Arc::new(MemoryNode::new(dag)); // empty DAG
        let bus = MemoryBus::new();
        let fetcher = Fetcher::new(node, Arc::new(bus.clone()));

        let missing = "bafkreibm6jg3ux5qumhcn2b3flc3tyu6dmlb4xa7u5bf44yegnrjhc4yeq";
        let req = request(missing, &format!("/ipfs/{missing}"));
        fetcher.handle(&codec::encode(&req).unwrap()).await.unwrap();

        let emitted = results(&bus);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].status, "failed");
        assert_eq!(emitted[0].skip_reason, "fetch_failed");
    }

    #[tokio::test]
    async fn node_budget_exhaustion_truncates_root_listing() {
        let dag = Arc::new(MemoryDag::new());
        let files: Vec<_> = (0..6u8).map(|i| dag.add_file(&[i])).collect();
        let entries: Vec<(String, Cid)> =
            files.iter().enumerate().map(|(i, c)| (format!("f{i}"), *c)).collect();
        let entry_refs: Vec<(&str, Cid)> = entries.iter().map(|(n, c)| (n.as_str(), *c)).collect();
        let root = dag.add_dir(&entry_refs);
        let node = Arc::new(MemoryNode::new(Arc::clone(&dag)));
        let bus = MemoryBus::new();
        let fetcher = Fetcher::new(node, Arc::new(bus.clone()));

        let mut req = request(&root.to_string(), &format!("/ipfs/{root}"));
        req.data.as_mut().unwrap().limits.as_mut().unwrap().max_dag_nodes = 3;
        fetcher.handle(&codec::encode(&req).unwrap()).await.unwrap();

        let emitted = results(&bus);
        // Root dir is truncated, charged children emitted, no terminal
        // failure: the budget was consumed by listing, not by a visit.
        assert!(emitted[0].directory.as_ref().unwrap().truncated);
        assert!(emitted.iter().all(|r| r.status != "failed"));
    }

    #[tokio::test]
    async fn subpath_deeper_than_max_depth_is_skipped_up_front() {
        let dag = Arc::new(MemoryDag::new());
        let node = Arc::new(MemoryNode::new(dag));
        let bus = MemoryBus::new();
        let fetcher = Fetcher::new(node, Arc::new(bus.clone()));

        let mut req = request("bafyroot", "/ipfs/bafyroot/a/b/c");
        req.data.as_mut().unwrap().limits.as_mut().unwrap().max_depth = 2;
        fetcher.handle(&codec::encode(&req).unwrap()).await.unwrap();

        let emitted = results(&bus);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].status, "skipped");
        assert_eq!(emitted[0].skip_reason, "limit_exceeded");
        assert_eq!(emitted[0].error, "path depth exceeded");
    }

    #[test]
    fn path_depth_counts_segments_below_the_root() {
        assert_eq!(path_depth("/ipfs/bafyroot"), 0);
        assert_eq!(path_depth("/ipfs/bafyroot/a"), 1);
        assert_eq!(path_depth("/ipfs/bafyroot/a/b"), 2);
    }

    #[test]
    fn retry_delay_backs_off_and_clamps() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(5);
        for attempt in 1..8 {
            let d = retry_delay(attempt, base, max);
            // Clamp plus 25% jitter.
            assert!(d <= Duration::from_millis(6_250), "attempt {attempt}: {d:?}");
        }
        let first = retry_delay(1, base, max);
        assert!(first >= Duration::from_millis(750 - 250 - 125));
    }
}
