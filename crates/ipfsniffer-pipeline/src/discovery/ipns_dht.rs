//! IPNS-over-DHT discovery worker.
//!
//! Server mode with the datastore wrapper only. The host's record-validator
//! table requires its `ipns` entry to be the host's own validator type, so
//! the overlay wrapper cannot be installed here; IPNS record keys and values
//! are observed at the datastore instead.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bus::Bus;
use crate::dedupe::{Dedupe, DedupeStore};
use crate::node::{DhtHost, RoutingParts};
use crate::sniff::{Sniffer, SniffingDatastore};
use crate::Result;

pub struct IpnsDhtWorker {
    pub host: Arc<dyn DhtHost>,
    pub bus: Arc<dyn Bus>,
    pub store: Arc<dyn DedupeStore>,

    pub dedupe: Dedupe,
}

impl IpnsDhtWorker {
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("discovery-ipns-dht starting");

        let sniffer = Arc::new(Sniffer::new(
            Arc::clone(&self.bus),
            Arc::clone(&self.store),
            self.dedupe.nested("ipnsdhtds"),
        ));

        let wire = Box::new(move |parts: RoutingParts| RoutingParts {
            datastore: Arc::new(SniffingDatastore::new(parts.datastore, sniffer)),
            validator: parts.validator,
            provider_store: parts.provider_store,
        });

        self.host.run_server(shutdown, wire).await?;
        Ok(())
    }
}
