//! DHT discovery worker.
//!
//! Runs the peer node's DHT in server mode so inbound provider traffic
//! reaches us, with the routing datastore and provider store wrapped for
//! sniffing. The record validator table is passed through untouched.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bus::Bus;
use crate::dedupe::{Dedupe, DedupeStore};
use crate::node::{DhtHost, RoutingParts};
use crate::sniff::{Sniffer, SniffingDatastore, SniffingProviderStore};
use crate::Result;

pub struct DhtWorker {
    pub host: Arc<dyn DhtHost>,
    pub bus: Arc<dyn Bus>,
    pub store: Arc<dyn DedupeStore>,

    pub dedupe: Dedupe,
}

impl DhtWorker {
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("discovery-dht starting");

        let provider_sniffer = Arc::new(Sniffer::new(
            Arc::clone(&self.bus),
            Arc::clone(&self.store),
            self.dedupe.clone(),
        ));
        // Datastore traffic gets its own nested dedup namespace.
        let datastore_sniffer = Arc::new(Sniffer::new(
            Arc::clone(&self.bus),
            Arc::clone(&self.store),
            self.dedupe.nested("dhtds"),
        ));

        let wire = Box::new(move |parts: RoutingParts| RoutingParts {
            datastore: Arc::new(SniffingDatastore::new(parts.datastore, datastore_sniffer)),
            validator: parts.validator,
            provider_store: Arc::new(SniffingProviderStore::new(
                parts.provider_store,
                provider_sniffer,
            )),
        });

        self.host.run_server(shutdown, wire).await?;
        Ok(())
    }
}
