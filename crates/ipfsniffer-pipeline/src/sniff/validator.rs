//! Record-validator overlay.
//!
//! The host dispatches validation by key namespace and checks the table's
//! shape; replacing the whole validator breaks it. The overlay copies the
//! table, shares every handler by reference, and substitutes only the `ipns`
//! entry.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{ipns, Sniffer};
use crate::node::{split_key_namespace, NamespacedValidator, NodeError, RecordValidator};

/// Wrap only the `ipns` entry of a namespaced validator table.
pub fn wrap_ipns_validator(
    inner: &NamespacedValidator,
    sniffer: Arc<Sniffer>,
) -> NamespacedValidator {
    let mut out = NamespacedValidator::new();
    for (namespace, validator) in inner.entries() {
        out.insert(namespace, Arc::clone(validator));
    }
    if let Some(ipns_validator) = inner.get("ipns") {
        out.insert(
            "ipns",
            Arc::new(SniffingValidator::new(Arc::clone(ipns_validator), sniffer)),
        );
    }
    out
}

/// Validator that publishes observed IPNS names and record targets after the
/// wrapped validator accepts a record.
pub struct SniffingValidator {
    inner: Arc<dyn RecordValidator>,
    sniffer: Arc<Sniffer>,
}

impl SniffingValidator {
    pub fn new(inner: Arc<dyn RecordValidator>, sniffer: Arc<Sniffer>) -> SniffingValidator {
        SniffingValidator { inner, sniffer }
    }

    async fn publish(&self, cid_or_path: &str, source_detail: &str) {
        if let Err(err) = self
            .sniffer
            .publish_cid(cid_or_path, "ipns-dht", source_detail, "", &[])
            .await
        {
            debug!(%cid_or_path, %err, "validator sniff publish failed");
        }
    }
}

#[async_trait]
impl RecordValidator for SniffingValidator {
    async fn validate(&self, key: &[u8], value: &[u8]) -> Result<(), NodeError> {
        self.inner.validate(key, value).await?;

        if split_key_namespace(key) != Some("ipns") {
            return Ok(());
        }

        // Stable source: the name itself.
        if let Some(name_path) = ipns::name_from_routing_key(key) {
            self.publish(&name_path, "routing_key").await;
        }
        // Direct source: the record's /ipfs target, when present.
        if let Some(target) = ipns::extract_ipfs_path_from_record(value) {
            self.publish(&target, "record_value").await;
        }

        Ok(())
    }

    async fn select(&self, key: &[u8], values: &[Bytes]) -> Result<usize, NodeError> {
        let idx = self.inner.select(key, values).await?;

        if !key.starts_with(b"/ipns/") {
            return Ok(idx);
        }
        if let Some(winner) = values.get(idx) {
            if let Some(target) = ipns::extract_ipfs_path_from_record(winner) {
                self.publish(&target, "select").await;
            }
        }

        Ok(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multihash::Multihash;

    use ipfsniffer_core::proto::CidDiscovered;
    use ipfsniffer_core::{codec, subjects};

    use crate::bus::MemoryBus;
    use crate::dedupe::{Dedupe, DedupeStore, MemoryDedupeStore, DEFAULT_TTL, SEEN_IPNS_DHT_PREFIX};

    struct RecordingValidator {
        accept: bool,
    }

    #[async_trait]
    impl RecordValidator for RecordingValidator {
        async fn validate(&self, _key: &[u8], _value: &[u8]) -> Result<(), NodeError> {
            if self.accept {
                Ok(())
            } else {
                Err(NodeError::Rpc("bad record".into()))
            }
        }
        async fn select(&self, _key: &[u8], values: &[Bytes]) -> Result<usize, NodeError> {
            Ok(values.len().saturating_sub(1))
        }
    }

    fn sniffer(bus: &MemoryBus) -> Arc<Sniffer> {
        Arc::new(Sniffer::new(
            Arc::new(bus.clone()),
            Arc::new(MemoryDedupeStore::new()) as Arc<dyn DedupeStore>,
            Dedupe::new(SEEN_IPNS_DHT_PREFIX, DEFAULT_TTL),
        ))
    }

    fn ipns_key() -> Vec<u8> {
        let peer_id = Multihash::<64>::wrap(0x00, b"validator-peer").unwrap();
        let mut key = b"/ipns/".to_vec();
        key.extend_from_slice(&peer_id.to_bytes());
        key
    }

    fn discovered(bus: &MemoryBus) -> Vec<CidDiscovered> {
        bus.published(subjects::CID_DISCOVERED)
            .iter()
            .map(|b| codec::decode(b).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn overlay_replaces_only_the_ipns_entry() {
        let bus = MemoryBus::new();
        let mut table = NamespacedValidator::new();
        let pk: Arc<dyn RecordValidator> = Arc::new(RecordingValidator { accept: true });
        table.insert("pk", Arc::clone(&pk));
        table.insert("ipns", Arc::new(RecordingValidator { accept: true }));

        let wrapped = wrap_ipns_validator(&table, sniffer(&bus));

        // pk entry is the very same handler, shared by reference.
        assert!(Arc::ptr_eq(wrapped.get("pk").unwrap(), &pk));
        // ipns entry was substituted.
        assert!(!Arc::ptr_eq(
            wrapped.get("ipns").unwrap(),
            table.get("ipns").unwrap()
        ));
    }

    #[tokio::test]
    async fn validate_publishes_name_and_target_after_delegation() {
        let bus = MemoryBus::new();
        let mut table = NamespacedValidator::new();
        table.insert("ipns", Arc::new(RecordingValidator { accept: true }));
        let wrapped = wrap_ipns_validator(&table, sniffer(&bus));

        let record = ipns::encode_record("/ipfs/bafyroot/data");
        wrapped.validate(&ipns_key(), &record).await.unwrap();

        let events = discovered(&bus);
        assert_eq!(events.len(), 2);
        let details: Vec<String> = events
            .iter()
            .map(|e| e.data.clone().unwrap().source_detail)
            .collect();
        assert!(details.contains(&"routing_key".to_string()));
        assert!(details.contains(&"record_value".to_string()));
        for e in &events {
            assert_eq!(e.data.clone().unwrap().source, "ipns-dht");
        }
    }

    #[tokio::test]
    async fn rejected_records_are_not_published() {
        let bus = MemoryBus::new();
        let mut table = NamespacedValidator::new();
        table.insert("ipns", Arc::new(RecordingValidator { accept: false }));
        let wrapped = wrap_ipns_validator(&table, sniffer(&bus));

        let record = ipns::encode_record("/ipfs/bafyroot/data");
        assert!(wrapped.validate(&ipns_key(), &record).await.is_err());
        assert!(discovered(&bus).is_empty());
    }

    #[tokio::test]
    async fn select_publishes_the_winning_target() {
        let bus = MemoryBus::new();
        let mut table = NamespacedValidator::new();
        table.insert("ipns", Arc::new(RecordingValidator { accept: true }));
        let wrapped = wrap_ipns_validator(&table, sniffer(&bus));

        let values = vec![
            Bytes::from(ipns::encode_record("/ipfs/bafyloser")),
            Bytes::from(ipns::encode_record("/ipfs/bafywinner")),
        ];
        let idx = wrapped.select(&ipns_key(), &values).await.unwrap();
        assert_eq!(idx, 1);

        let events = discovered(&bus);
        assert_eq!(events.len(), 1);
        let data = events[0].data.clone().unwrap();
        assert_eq!(data.cid_or_path, "/ipfs/bafywinner");
        assert_eq!(data.source_detail, "select");
    }
}
