//! Deterministic in-memory node used by the test suite.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use multihash::Multihash;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use super::{
    DagLink, DagNode, DagNodeKind, DagService, FileReader, NodeError, PeerNode, PubsubMessage,
};

const SHA2_256: u64 = 0x12;
const RAW_CODEC: u64 = 0x55;
const DAG_PB_CODEC: u64 = 0x70;

fn digest_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

enum StoredNode {
    File(Bytes),
    Dir(Vec<(String, Cid)>),
}

/// Content-addressed in-memory DAG.
#[derive(Default)]
pub struct MemoryDag {
    nodes: Mutex<HashMap<Cid, Arc<StoredNode>>>,
}

impl MemoryDag {
    pub fn new() -> MemoryDag {
        MemoryDag::default()
    }

    /// Store a file block; the CID is derived from the content.
    pub fn add_file(&self, data: &[u8]) -> Cid {
        let mh = Multihash::<64>::wrap(SHA2_256, &digest_sha256(data)).unwrap();
        let cid = Cid::new_v1(RAW_CODEC, mh);
        self.nodes
            .lock()
            .insert(cid, Arc::new(StoredNode::File(Bytes::copy_from_slice(data))));
        cid
    }

    /// Store a directory node over previously added children.
    pub fn add_dir(&self, entries: &[(&str, Cid)]) -> Cid {
        let mut manifest = Vec::new();
        for (name, cid) in entries {
            manifest.extend_from_slice(name.as_bytes());
            manifest.extend_from_slice(&cid.to_bytes());
        }
        let mh = Multihash::<64>::wrap(SHA2_256, &digest_sha256(&manifest)).unwrap();
        let cid = Cid::new_v1(DAG_PB_CODEC, mh);
        let links = entries
            .iter()
            .map(|(name, child)| (name.to_string(), *child))
            .collect();
        self.nodes.lock().insert(cid, Arc::new(StoredNode::Dir(links)));
        cid
    }

    fn node(&self, cid: &Cid) -> Result<Arc<StoredNode>, NodeError> {
        self.nodes
            .lock()
            .get(cid)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(cid.to_string()))
    }
}

#[async_trait]
impl DagService for MemoryDag {
    async fn get(&self, cid: &Cid) -> Result<DagNode, NodeError> {
        match &*self.node(cid)? {
            StoredNode::File(data) => Ok(DagNode {
                cid: *cid,
                kind: DagNodeKind::File { size: data.len() as i64 },
            }),
            StoredNode::Dir(entries) => Ok(DagNode {
                cid: *cid,
                kind: DagNodeKind::Directory {
                    links: entries
                        .iter()
                        .map(|(name, child)| DagLink { name: name.clone(), cid: *child })
                        .collect(),
                },
            }),
        }
    }

    async fn open_file(&self, cid: &Cid) -> Result<FileReader, NodeError> {
        match &*self.node(cid)? {
            StoredNode::File(data) => Ok(Box::new(Cursor::new(data.to_vec()))),
            StoredNode::Dir(_) => Err(NodeError::Unsupported("not a file".into())),
        }
    }
}

/// In-memory peer node over a [`MemoryDag`], with scriptable names, IPNS
/// records, and pubsub topics.
pub struct MemoryNode {
    dag: Arc<MemoryDag>,
    names: Mutex<HashMap<String, String>>,
    records: Mutex<HashMap<String, Bytes>>,
    topics: Mutex<HashMap<String, Vec<mpsc::Sender<PubsubMessage>>>>,
}

impl MemoryNode {
    pub fn new(dag: Arc<MemoryDag>) -> MemoryNode {
        MemoryNode {
            dag,
            names: Mutex::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Script an IPNS name resolution.
    pub fn set_name(&self, name: &str, target: &str) {
        self.names.lock().insert(name.to_string(), target.to_string());
    }

    /// Script an IPNS record returned by the pubsub router.
    pub fn set_record(&self, name: &str, record: &[u8]) {
        self.records
            .lock()
            .insert(name.to_string(), Bytes::copy_from_slice(record));
    }

    /// Deliver a message to everyone subscribed to `topic`.
    pub async fn publish_message(&self, topic: &str, data: &[u8], from: &str) {
        let senders = self.topics.lock().get(topic).cloned().unwrap_or_default();
        for tx in senders {
            let _ = tx
                .send(PubsubMessage { data: Bytes::copy_from_slice(data), from: from.to_string() })
                .await;
        }
    }
}

#[async_trait]
impl PeerNode for MemoryNode {
    fn dag(&self) -> Arc<dyn DagService> {
        Arc::clone(&self.dag) as Arc<dyn DagService>
    }

    async fn resolve_path(&self, path: &str) -> Result<Cid, NodeError> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        if segments.next() != Some("ipfs") {
            return Err(NodeError::InvalidPath(path.to_string()));
        }
        let root = segments
            .next()
            .ok_or_else(|| NodeError::InvalidPath(path.to_string()))?;
        let mut current =
            Cid::try_from(root).map_err(|_| NodeError::InvalidPath(path.to_string()))?;

        for segment in segments {
            match self.dag.get(&current).await?.kind {
                DagNodeKind::Directory { links } => {
                    current = links
                        .iter()
                        .find(|l| l.name == segment)
                        .map(|l| l.cid)
                        .ok_or_else(|| NodeError::NotFound(format!("no link named {segment}")))?;
                }
                DagNodeKind::File { .. } => {
                    return Err(NodeError::InvalidPath(format!("{segment} under a file")));
                }
            }
        }
        Ok(current)
    }

    async fn resolve_name(&self, name: &str) -> Result<String, NodeError> {
        self.names
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(format!("ipns name {name}")))
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<PubsubMessage>, NodeError> {
        let (tx, rx) = mpsc::channel(64);
        self.topics.lock().entry(topic.to_string()).or_default().push(tx);
        Ok(rx)
    }

    async fn search_name_record(
        &self,
        name: &str,
        _timeout: Duration,
    ) -> Result<Option<Bytes>, NodeError> {
        Ok(self.records.lock().get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn files_and_dirs_round_trip() {
        let dag = MemoryDag::new();
        let file = dag.add_file(b"hello");
        let dir = dag.add_dir(&[("hello.txt", file)]);

        match dag.get(&file).await.unwrap().kind {
            DagNodeKind::File { size } => assert_eq!(size, 5),
            _ => panic!("expected file"),
        }
        match dag.get(&dir).await.unwrap().kind {
            DagNodeKind::Directory { links } => {
                assert_eq!(links.len(), 1);
                assert_eq!(links[0].name, "hello.txt");
            }
            _ => panic!("expected directory"),
        }
    }

    #[tokio::test]
    async fn path_resolution_walks_links() {
        let dag = Arc::new(MemoryDag::new());
        let file = dag.add_file(b"content");
        let sub = dag.add_dir(&[("file.txt", file)]);
        let root = dag.add_dir(&[("sub", sub)]);
        let node = MemoryNode::new(Arc::clone(&dag));

        let resolved = node
            .resolve_path(&format!("/ipfs/{root}/sub/file.txt"))
            .await
            .unwrap();
        assert_eq!(resolved, file);

        let err = node
            .resolve_path(&format!("/ipfs/{root}/missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::NotFound(_)));
    }

    #[tokio::test]
    async fn identical_content_gets_identical_cids() {
        let dag = MemoryDag::new();
        assert_eq!(dag.add_file(b"same"), dag.add_file(b"same"));
        assert_ne!(dag.add_file(b"same"), dag.add_file(b"different"));
    }
}
