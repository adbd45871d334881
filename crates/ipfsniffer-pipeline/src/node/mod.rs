//! Interface to the participating peer node.
//!
//! The node itself (routing, block fetching, name resolution, pubsub
//! transport) is an external collaborator; this module pins down the exact
//! seams the pipeline needs:
//!
//! - [`Datastore`] - the routing datastore the DHT keeps its state in
//! - [`RecordValidator`] / [`NamespacedValidator`] - record verification
//!   dispatched by key namespace
//! - [`ProviderStore`] - provider-record storage
//! - [`DagService`] - content-addressed block/node access for traversal
//! - [`PeerNode`] - path/name resolution, pubsub, IPNS record search
//! - [`DhtHost`] - run the node's DHT in server mode with caller-rewired
//!   routing internals
//!
//! Errors carry a typed retryability classification instead of the fragile
//! match-on-message-text contract.

pub mod http;
pub mod memory;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by the peer node.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("no peers available")]
    NoPeers,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("provider not found")]
    ProviderNotFound,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A per-job resource budget was exhausted.
    #[error("{limit} exceeded")]
    LimitExceeded { limit: &'static str },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("rpc: {0}")]
    Rpc(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Transient conditions worth a bounded retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NodeError::Timeout
                | NodeError::Cancelled
                | NodeError::NoPeers
                | NodeError::ConnectionRefused
                | NodeError::ProviderNotFound
        )
    }

    /// True for exhausted per-job budgets.
    pub fn is_limit(&self) -> bool {
        matches!(self, NodeError::LimitExceeded { .. })
    }
}

/// A slash-separated datastore key, e.g. `/providers/<b32>/<peer>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(String);

impl Key {
    pub fn new(raw: &str) -> Key {
        let trimmed = raw.trim_matches('/');
        Key(format!("/{trimmed}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Non-empty path segments in order.
    pub fn segments(&self) -> Vec<&str> {
        self.0.split('/').filter(|s| !s.is_empty()).collect()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The routing datastore the DHT stores its internal state in.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn get(&self, key: &Key) -> Result<Option<Bytes>, NodeError>;
    async fn has(&self, key: &Key) -> Result<bool, NodeError>;
    async fn get_size(&self, key: &Key) -> Result<Option<usize>, NodeError>;
    async fn query(&self, prefix: &Key) -> Result<Vec<(Key, Bytes)>, NodeError>;
    async fn put(&self, key: &Key, value: Bytes) -> Result<(), NodeError>;
    async fn delete(&self, key: &Key) -> Result<(), NodeError>;
}

/// Verifies records received from the network.
#[async_trait]
pub trait RecordValidator: Send + Sync {
    /// Validate a record. `key` is the raw routing key bytes
    /// (`/<namespace>/<binary suffix>`).
    async fn validate(&self, key: &[u8], value: &[u8]) -> Result<(), NodeError>;

    /// Pick the best of several records for one key; returns the index.
    async fn select(&self, key: &[u8], values: &[Bytes]) -> Result<usize, NodeError>;
}

/// Validator dispatch table keyed by the first key namespace.
///
/// The host's invariants on other namespaces are preserved by sharing the
/// original handlers by reference; overlays copy the table, never the
/// handlers.
#[derive(Clone, Default)]
pub struct NamespacedValidator {
    entries: HashMap<String, Arc<dyn RecordValidator>>,
}

impl NamespacedValidator {
    pub fn new() -> NamespacedValidator {
        NamespacedValidator::default()
    }

    pub fn insert(&mut self, namespace: &str, validator: Arc<dyn RecordValidator>) {
        self.entries.insert(namespace.to_string(), validator);
    }

    pub fn get(&self, namespace: &str) -> Option<&Arc<dyn RecordValidator>> {
        self.entries.get(namespace)
    }

    /// Copy of the table for partial overlays.
    pub fn entries(&self) -> &HashMap<String, Arc<dyn RecordValidator>> {
        &self.entries
    }

    fn dispatch(&self, key: &[u8]) -> Result<&Arc<dyn RecordValidator>, NodeError> {
        let namespace = split_key_namespace(key)
            .ok_or_else(|| NodeError::InvalidPath("key has no namespace".into()))?;
        self.entries
            .get(namespace)
            .ok_or_else(|| NodeError::Unsupported(format!("no validator for namespace {namespace:?}")))
    }
}

/// First segment of a routing key, e.g. `ipns` for `/ipns/<suffix>`.
pub fn split_key_namespace(key: &[u8]) -> Option<&str> {
    if !key.starts_with(b"/") {
        return None;
    }
    let rest = &key[1..];
    let end = rest.iter().position(|&b| b == b'/')?;
    std::str::from_utf8(&rest[..end]).ok()
}

#[async_trait]
impl RecordValidator for NamespacedValidator {
    async fn validate(&self, key: &[u8], value: &[u8]) -> Result<(), NodeError> {
        self.dispatch(key)?.validate(key, value).await
    }

    async fn select(&self, key: &[u8], values: &[Bytes]) -> Result<usize, NodeError> {
        self.dispatch(key)?.select(key, values).await
    }
}

/// A peer claiming to provide some content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub peer_id: String,
    pub addrs: Vec<String>,
}

/// Storage for provider records. Keys are multihashes.
#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn add_provider(&self, key: &[u8], provider: ProviderInfo) -> Result<(), NodeError>;
    async fn get_providers(&self, key: &[u8]) -> Result<Vec<ProviderInfo>, NodeError>;
}

/// A link from a DAG node to a child.
#[derive(Debug, Clone)]
pub struct DagLink {
    pub name: String,
    pub cid: Cid,
}

/// A resolved DAG node, shaped for traversal.
#[derive(Debug, Clone)]
pub struct DagNode {
    pub cid: Cid,
    pub kind: DagNodeKind,
}

#[derive(Debug, Clone)]
pub enum DagNodeKind {
    File { size: i64 },
    Directory { links: Vec<DagLink> },
}

/// Byte reader over a (possibly multi-block) file node.
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Content-addressed node access used by the DAG traversal.
#[async_trait]
pub trait DagService: Send + Sync {
    async fn get(&self, cid: &Cid) -> Result<DagNode, NodeError>;
    async fn open_file(&self, cid: &Cid) -> Result<FileReader, NodeError>;
}

/// A pubsub message observed on a subscribed topic.
#[derive(Debug, Clone)]
pub struct PubsubMessage {
    pub data: Bytes,
    pub from: String,
}

/// The data-plane surface of the peer node.
#[async_trait]
pub trait PeerNode: Send + Sync {
    fn dag(&self) -> Arc<dyn DagService>;

    /// Resolve `/ipfs/<cid>[/subpath]` to the CID of the final node.
    async fn resolve_path(&self, path: &str) -> Result<Cid, NodeError>;

    /// Resolve an IPNS name to its current `/ipfs/...` target.
    async fn resolve_name(&self, name: &str) -> Result<String, NodeError>;

    /// Subscribe to a pubsub topic; the channel closes on shutdown.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<PubsubMessage>, NodeError>;

    /// Time-bounded search for an IPNS record via the pubsub router,
    /// keeping the per-name subscription alive as a side effect.
    async fn search_name_record(
        &self,
        name: &str,
        timeout: std::time::Duration,
    ) -> Result<Option<Bytes>, NodeError>;
}

/// Routing internals handed to the caller while the node assembles its
/// routing stack. Wrappers replace entries; untouched parts are passed back
/// as-is.
pub struct RoutingParts {
    pub datastore: Arc<dyn Datastore>,
    pub validator: NamespacedValidator,
    pub provider_store: Arc<dyn ProviderStore>,
}

/// Rewires routing internals during node assembly.
pub type RoutingWire = Box<dyn FnOnce(RoutingParts) -> RoutingParts + Send>;

/// A host able to run the node's DHT in server mode.
#[async_trait]
pub trait DhtHost: Send + Sync {
    /// Open the repo, build the routing stack (offering it to `wire` for
    /// wrapping), and serve until `shutdown` fires.
    async fn run_server(&self, shutdown: CancellationToken, wire: RoutingWire)
        -> Result<(), NodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_normalize_and_split() {
        let key = Key::new("providers/abc/peer1");
        assert_eq!(key.as_str(), "/providers/abc/peer1");
        assert_eq!(key.segments(), vec!["providers", "abc", "peer1"]);

        let key = Key::new("/ipns/xyz");
        assert_eq!(key.segments(), vec!["ipns", "xyz"]);
    }

    #[test]
    fn namespace_split_requires_leading_slash() {
        assert_eq!(split_key_namespace(b"/ipns/suffix"), Some("ipns"));
        assert_eq!(split_key_namespace(b"ipns/suffix"), None);
        assert_eq!(split_key_namespace(b"/ipns"), None);
    }

    struct AlwaysOk;

    #[async_trait]
    impl RecordValidator for AlwaysOk {
        async fn validate(&self, _key: &[u8], _value: &[u8]) -> Result<(), NodeError> {
            Ok(())
        }
        async fn select(&self, _key: &[u8], _values: &[Bytes]) -> Result<usize, NodeError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn namespaced_validator_dispatches_by_first_segment() {
        let mut nv = NamespacedValidator::new();
        nv.insert("ipns", Arc::new(AlwaysOk));

        assert!(nv.validate(b"/ipns/abc", b"record").await.is_ok());
        let err = nv.validate(b"/pk/abc", b"record").await.unwrap_err();
        assert!(matches!(err, NodeError::Unsupported(_)));
    }

    #[test]
    fn retryable_classification() {
        assert!(NodeError::Timeout.is_retryable());
        assert!(NodeError::NoPeers.is_retryable());
        assert!(!NodeError::NotFound("x".into()).is_retryable());
        assert!(!NodeError::LimitExceeded { limit: "max_dag_nodes" }.is_retryable());
        assert!(NodeError::LimitExceeded { limit: "max_dag_nodes" }.is_limit());
    }
}
