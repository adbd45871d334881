//! Sniffing layer: observe node internals, publish `cid.discovered`.
//!
//! All wrappers share one contract: sniffing is a best-effort side effect.
//! A failure to dedup or publish is logged and swallowed; the wrapped
//! operation always proceeds as if the wrapper were not there.

pub mod datastore;
pub mod ipns;
pub mod provider;
pub mod validator;

pub use datastore::SniffingDatastore;
pub use provider::SniffingProviderStore;
pub use validator::{wrap_ipns_validator, SniffingValidator};

use std::sync::Arc;

use ipfsniffer_core::proto::{CidDiscovered, CidDiscoveredData};
use ipfsniffer_core::{codec, new_message_id, now_rfc3339, subjects, ENVELOPE_VERSION};

use crate::bus::{self, Bus};
use crate::dedupe::{Dedupe, DedupeStore};
use crate::Result;

/// Publishes observed identifiers, deduplicated per source.
pub struct Sniffer {
    bus: Arc<dyn Bus>,
    store: Arc<dyn DedupeStore>,
    dedupe: Dedupe,
}

impl Sniffer {
    pub fn new(bus: Arc<dyn Bus>, store: Arc<dyn DedupeStore>, dedupe: Dedupe) -> Sniffer {
        Sniffer { bus, store, dedupe }
    }

    /// Publish one observed identifier to `cid.discovered`.
    ///
    /// Dedup key is `<source>:<cid_or_path>` under this sniffer's prefix, so
    /// distinct sources each get one emission per window.
    pub async fn publish_cid(
        &self,
        cid_or_path: &str,
        source: &str,
        source_detail: &str,
        peer_id: &str,
        remote_addrs: &[String],
    ) -> Result<()> {
        if self
            .dedupe
            .seen(self.store.as_ref(), &format!("{source}:{cid_or_path}"))
            .await?
        {
            return Ok(());
        }

        let env = CidDiscovered {
            v: ENVELOPE_VERSION,
            id: new_message_id(),
            ts: now_rfc3339(),
            trace: None,
            data: Some(CidDiscoveredData {
                cid_or_path: cid_or_path.to_string(),
                source: source.to_string(),
                source_detail: source_detail.to_string(),
                peer_id: peer_id.to_string(),
                remote_addrs: remote_addrs.to_vec(),
                observed_at: now_rfc3339(),
            }),
        };

        let payload = codec::encode(&env)?;
        if let Err(err) = bus::publish(self.bus.as_ref(), subjects::CID_DISCOVERED, &payload).await
        {
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
    use crate::dedupe::{MemoryDedupeStore, DEFAULT_TTL, SEEN_CID_PREFIX};

    fn sniffer(bus: &MemoryBus, store: &Arc<MemoryDedupeStore>) -> Sniffer {
        Sniffer::new(
            Arc::new(bus.clone()),
            Arc::clone(store) as Arc<dyn DedupeStore>,
            Dedupe::new(SEEN_CID_PREFIX, DEFAULT_TTL),
        )
    }

    #[tokio::test]
    async fn publishes_an_envelope_once_per_window() {
        let bus = MemoryBus::new();
        let store = Arc::new(MemoryDedupeStore::new());
        let sniffer = sniffer(&bus, &store);

        sniffer.publish_cid("bafyroot", "pubsub", "fil", "", &[]).await.unwrap();
        sniffer.publish_cid("bafyroot", "pubsub", "fil", "", &[]).await.unwrap();

        let published = bus.published(subjects::CID_DISCOVERED);
        assert_eq!(published.len(), 1);

        let env: CidDiscovered = codec::decode(&published[0]).unwrap();
        assert_eq!(env.v, ENVELOPE_VERSION);
        let data = env.data.unwrap();
        assert_eq!(data.cid_or_path, "bafyroot");
        assert_eq!(data.source, "pubsub");
        assert_eq!(data.source_detail, "fil");
    }

    #[tokio::test]
    async fn distinct_sources_are_deduped_independently() {
        let bus = MemoryBus::new();
        let store = Arc::new(MemoryDedupeStore::new());
        let sniffer = sniffer(&bus, &store);

        sniffer.publish_cid("bafyroot", "pubsub", "fil", "", &[]).await.unwrap();
        sniffer.publish_cid("bafyroot", "dht", "provider_add", "", &[]).await.unwrap();

        assert_eq!(bus.published(subjects::CID_DISCOVERED).len(), 2);
    }
}
