//! Provider-store wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use ipfsniffer_core::cidutil;

use super::Sniffer;
use crate::node::{NodeError, ProviderInfo, ProviderStore};

/// Provider store that publishes each added provider record as a discovered
/// CID before delegating.
pub struct SniffingProviderStore {
    inner: Arc<dyn ProviderStore>,
    sniffer: Arc<Sniffer>,
}

impl SniffingProviderStore {
    pub fn new(inner: Arc<dyn ProviderStore>, sniffer: Arc<Sniffer>) -> SniffingProviderStore {
        SniffingProviderStore { inner, sniffer }
    }
}

#[async_trait]
impl ProviderStore for SniffingProviderStore {
    async fn add_provider(&self, key: &[u8], provider: ProviderInfo) -> Result<(), NodeError> {
        if let Some(cid_str) = cidutil::multihash_to_cid_string(key) {
            if let Err(err) = self
                .sniffer
                .publish_cid(&cid_str, "dht", "provider_add", &provider.peer_id, &provider.addrs)
                .await
            {
                debug!(%cid_str, %err, "provider sniff publish failed");
            }
        }
        self.inner.add_provider(key, provider).await
    }

    async fn get_providers(&self, key: &[u8]) -> Result<Vec<ProviderInfo>, NodeError> {
        self.inner.get_providers(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use multihash::Multihash;
    use parking_lot::Mutex;

    use ipfsniffer_core::proto::CidDiscovered;
    use ipfsniffer_core::{codec, subjects};

    use crate::bus::MemoryBus;
    use crate::dedupe::{Dedupe, DedupeStore, MemoryDedupeStore, DEFAULT_TTL, SEEN_CID_PREFIX};

    #[derive(Default)]
    struct MapProviderStore {
        providers: Mutex<HashMap<Vec<u8>, Vec<ProviderInfo>>>,
    }

    #[async_trait]
    impl ProviderStore for MapProviderStore {
        async fn add_provider(&self, key: &[u8], provider: ProviderInfo) -> Result<(), NodeError> {
            self.providers.lock().entry(key.to_vec()).or_default().push(provider);
            Ok(())
        }
        async fn get_providers(&self, key: &[u8]) -> Result<Vec<ProviderInfo>, NodeError> {
            Ok(self.providers.lock().get(key).cloned().unwrap_or_default())
        }
    }

    fn wrapped(bus: &MemoryBus) -> (SniffingProviderStore, Arc<MapProviderStore>) {
        let inner = Arc::new(MapProviderStore::default());
        let sniffer = Sniffer::new(
            Arc::new(bus.clone()),
            Arc::new(MemoryDedupeStore::new()) as Arc<dyn DedupeStore>,
            Dedupe::new(SEEN_CID_PREFIX, DEFAULT_TTL),
        );
        (
            SniffingProviderStore::new(
                Arc::clone(&inner) as Arc<dyn ProviderStore>,
                Arc::new(sniffer),
            ),
            inner,
        )
    }

    #[tokio::test]
    async fn add_provider_publishes_cid_with_peer_info() {
        let bus = MemoryBus::new();
        let (store, inner) = wrapped(&bus);

        let mh = Multihash::<64>::wrap(0x12, &[0xcd; 32]).unwrap();
        let provider = ProviderInfo {
            peer_id: "12D3KooWpeer".into(),
            addrs: vec!["/ip4/10.0.0.1/tcp/4001".into()],
        };
        store.add_provider(&mh.to_bytes(), provider.clone()).await.unwrap();

        let published = bus.published(subjects::CID_DISCOVERED);
        assert_eq!(published.len(), 1);
        let env: CidDiscovered = codec::decode(&published[0]).unwrap();
        let data = env.data.unwrap();
        assert!(data.cid_or_path.starts_with("Qm"), "sha2-256 keys become CIDv0");
        assert_eq!(data.source, "dht");
        assert_eq!(data.source_detail, "provider_add");
        assert_eq!(data.peer_id, "12D3KooWpeer");
        assert_eq!(data.remote_addrs, vec!["/ip4/10.0.0.1/tcp/4001".to_string()]);

        // Delegation happened regardless of the sniff.
        assert_eq!(store.get_providers(&mh.to_bytes()).await.unwrap(), vec![provider]);
        assert_eq!(inner.providers.lock().len(), 1);
    }

    #[tokio::test]
    async fn undecodable_keys_still_delegate() {
        let bus = MemoryBus::new();
        let (store, inner) = wrapped(&bus);

        let provider = ProviderInfo { peer_id: "p".into(), addrs: vec![] };
        store.add_provider(b"", provider).await.unwrap();

        assert!(bus.published(subjects::CID_DISCOVERED).is_empty());
        assert_eq!(inner.providers.lock().len(), 1);
    }

    #[tokio::test]
    async fn repeat_providers_are_deduped() {
        let bus = MemoryBus::new();
        let (store, _) = wrapped(&bus);

        let mh = Multihash::<64>::wrap(0x12, &[0xee; 32]).unwrap();
        for _ in 0..3 {
            store
                .add_provider(&mh.to_bytes(), ProviderInfo { peer_id: "p".into(), addrs: vec![] })
                .await
                .unwrap();
        }
        assert_eq!(bus.published(subjects::CID_DISCOVERED).len(), 1);
    }
}
