//! IPNS-over-pubsub discovery worker.
//!
//! There is no global IPNS pubsub feed; subscriptions exist per-name only.
//! Seeded with known names, the worker periodically runs a time-bounded
//! record search through the pubsub router, which both harvests the latest
//! value and keeps the per-name subscription alive.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::Bus;
use crate::dedupe::{Dedupe, DedupeStore};
use crate::node::PeerNode;
use crate::sniff::{ipns, Sniffer};
use crate::Result;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct IpnsPubsubWorker {
    pub node: Arc<dyn PeerNode>,
    pub bus: Arc<dyn Bus>,
    pub store: Arc<dyn DedupeStore>,

    pub names: Vec<String>,
    pub poll: Duration,
    pub dedupe: Dedupe,
}

impl IpnsPubsubWorker {
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(names = self.names.len(), poll_secs = self.poll.as_secs(), "discovery-ipns-pubsub started");

        let sniffer = Sniffer::new(
            Arc::clone(&self.bus),
            Arc::clone(&self.store),
            self.dedupe.clone(),
        );

        // Kick once on startup, then poll.
        self.poll_names(&sniffer).await;

        let mut ticker = tokio::time::interval(self.poll);
        ticker.tick().await; // immediate first tick already handled
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => self.poll_names(&sniffer).await,
            }
        }
    }

    async fn poll_names(&self, sniffer: &Sniffer) {
        for name in &self.names {
            let name = name.trim().trim_start_matches("/ipns/");
            if name.is_empty() {
                continue;
            }

            let record = match self.node.search_name_record(name, SEARCH_TIMEOUT).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(err) => {
                    debug!(name, %err, "ipns record search failed");
                    continue;
                }
            };

            if let Some(target) = ipns::extract_ipfs_path_from_record(&record) {
                if let Err(err) = sniffer
                    .publish_cid(&target, "ipns-pubsub", "search_value", "", &[])
                    .await
                {
                    debug!(name, %err, "publish ipns target failed");
                }
            }
        }
    }
}
