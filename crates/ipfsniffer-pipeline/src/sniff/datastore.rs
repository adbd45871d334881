//! Routing-datastore wrapper.
//!
//! The DHT encodes content multihashes and routing keys into datastore key
//! segments (base32, no padding), so observing datastore operations yields a
//! broad stream of identifiers moving through the DHT. The namespace filter
//! keeps the noise down: only `providers`, `provider`, `ipns`, and `pk` keys
//! are examined.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use ipfsniffer_core::cidutil;

use super::{ipns, Sniffer};
use crate::node::{Datastore, Key, NodeError};

/// Datastore wrapper that sniffs keys before delegating every operation.
pub struct SniffingDatastore {
    inner: Arc<dyn Datastore>,
    sniffer: Arc<Sniffer>,
}

impl SniffingDatastore {
    pub fn new(inner: Arc<dyn Datastore>, sniffer: Arc<Sniffer>) -> SniffingDatastore {
        SniffingDatastore { inner, sniffer }
    }

    async fn sniff_key(&self, op: &str, key: &Key, value: Option<&[u8]>) {
        let parts = key.segments();
        if parts.len() < 2 {
            return;
        }

        let namespace = parts[0];
        match namespace {
            "providers" | "provider" | "ipns" | "pk" => {}
            _ => return,
        }

        let cand = parts[1];
        if cand.is_empty() {
            return;
        }

        // The DHT puts the multihash/CID in the second segment, base32 raw.
        if let Ok(bytes) = multibase::Base::Base32Lower.decode(cand.to_lowercase()) {
            if let Some(cid_str) = cidutil::cid_string_from_bytes(&bytes) {
                self.publish(&cid_str, "dht", &format!("datastore_{op}:{namespace}")).await;
                return;
            }

            // ipns keys hold routing-key bytes (peer id); the value on a put
            // is the record itself.
            if namespace == "ipns" {
                if let Some(name_path) = ipns::name_from_peer_id_bytes(&bytes) {
                    self.publish(&name_path, "ipns-dht", &format!("datastore_{op}:routing_key"))
                        .await;
                }
                if let Some(value) = value {
                    if !value.is_empty() {
                        if let Some(target) = ipns::extract_ipfs_path_from_record(value) {
                            self.publish(
                                &target,
                                "ipns-dht",
                                &format!("datastore_{op}:record_value"),
                            )
                            .await;
                        }
                    }
                }
            }
        }

        // Fallback: the segment may already carry CID strings.
        for cid_str in cidutil::extract_cids_from_segments(&cand.to_lowercase()) {
            self.publish(&cid_str, "dht", &format!("datastore_{op}:{namespace}")).await;
        }
    }

    async fn publish(&self, cid_or_path: &str, source: &str, source_detail: &str) {
        if let Err(err) = self
            .sniffer
            .publish_cid(cid_or_path, source, source_detail, "", &[])
            .await
        {
            debug!(%cid_or_path, source, %err, "datastore sniff publish failed");
        }
    }
}

#[async_trait]
impl Datastore for SniffingDatastore {
    async fn get(&self, key: &Key) -> Result<Option<Bytes>, NodeError> {
        self.sniff_key("get", key, None).await;
        self.inner.get(key).await
    }

    async fn has(&self, key: &Key) -> Result<bool, NodeError> {
        self.sniff_key("has", key, None).await;
        self.inner.has(key).await
    }

    async fn get_size(&self, key: &Key) -> Result<Option<usize>, NodeError> {
        self.sniff_key("getsize", key, None).await;
        self.inner.get_size(key).await
    }

    async fn query(&self, prefix: &Key) -> Result<Vec<(Key, Bytes)>, NodeError> {
        if !prefix.as_str().is_empty() {
            self.sniff_key("query", prefix, None).await;
        }
        self.inner.query(prefix).await
    }

    async fn put(&self, key: &Key, value: Bytes) -> Result<(), NodeError> {
        self.sniff_key("put", key, Some(&value)).await;
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &Key) -> Result<(), NodeError> {
        self.sniff_key("delete", key, None).await;
        self.inner.delete(key).await
    }
}
