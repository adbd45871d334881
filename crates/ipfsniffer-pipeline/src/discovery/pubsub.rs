//! Pubsub discovery worker.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use ipfsniffer_core::cidutil;

use crate::bus::Bus;
use crate::dedupe::{Dedupe, DedupeStore};
use crate::node::PeerNode;
use crate::sniff::Sniffer;
use crate::{Error, Result};

/// Subscribes to a fixed topic list and publishes every CID-like token found
/// in message payloads.
pub struct PubsubWorker {
    pub node: Arc<dyn PeerNode>,
    pub bus: Arc<dyn Bus>,
    pub store: Arc<dyn DedupeStore>,

    pub topics: Vec<String>,
    pub dedupe: Dedupe,
}

impl PubsubWorker {
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        if self.topics.is_empty() {
            return Err(Error::Config("no pubsub topics configured".into()));
        }

        let sniffer = Arc::new(Sniffer::new(
            Arc::clone(&self.bus),
            Arc::clone(&self.store),
            self.dedupe.clone(),
        ));

        let mut tasks = Vec::with_capacity(self.topics.len());
        for topic in &self.topics {
            let mut rx = self.node.subscribe(topic).await?;
            info!(topic, "pubsub subscribed");

            let topic = topic.clone();
            let sniffer = Arc::clone(&sniffer);
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    let msg = tokio::select! {
                        _ = shutdown.cancelled() => return,
                        msg = rx.recv() => msg,
                    };
                    let Some(msg) = msg else {
                        debug!(topic, "pubsub subscription closed");
                        return;
                    };
                    handle_message(&sniffer, &topic, &msg.data, &msg.from).await;
                }
            }));
        }

        shutdown.cancelled().await;
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}

async fn handle_message(sniffer: &Sniffer, topic: &str, payload: &[u8], peer_id: &str) {
    let text = String::from_utf8_lossy(payload);
    for cid_str in cidutil::extract_cid_strings(&text) {
        if let Err(err) = sniffer.publish_cid(&cid_str, "pubsub", topic, peer_id, &[]).await {
            error!(%cid_str, topic, %err, "publish discovered cid");
            continue;
        }
        debug!(%cid_str, topic, "cid discovered");
    }
}
