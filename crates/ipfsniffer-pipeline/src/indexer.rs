//! Indexer worker: batches `index.request` messages into bulk writes.
//!
//! Batch-level failures (transport, whole-request status, item-count
//! mismatch) leave the batch unacked so the bus redelivers. Per-item
//! rejections are dead-lettered and acked; a persistently broken document
//! must not block the stream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ipfsniffer_core::proto::{IndexRequest, IndexRequestData};
use ipfsniffer_core::{codec, subjects};

use ipfsniffer_index::{BulkOp, SearchClient};

use crate::bus::{self, Bus, Delivery};
use crate::Result;

const PULL_WAIT: Duration = Duration::from_millis(200);

pub struct Indexer {
    pub bus: Arc<dyn Bus>,
    pub search: SearchClient,

    pub durable: String,
    pub bulk_max: usize,
    pub flush_interval: Duration,
}

impl Indexer {
    pub fn new(bus: Arc<dyn Bus>, search: SearchClient) -> Indexer {
        Indexer {
            bus,
            search,
            durable: "indexer".to_string(),
            bulk_max: 100,
            flush_interval: Duration::from_secs(2),
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(subject = subjects::INDEX_REQUEST, durable = %self.durable, bulk_max = self.bulk_max, "indexer started");

        let mut batch: Vec<(Delivery, IndexRequestData)> = Vec::new();
        let mut last_flush = Instant::now();

        loop {
            let pulled = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                pulled = self.bus.pull(subjects::INDEX_REQUEST, &self.durable, PULL_WAIT) => pulled?,
            };

            match pulled {
                None => {
                    if !batch.is_empty() && last_flush.elapsed() >= self.flush_interval {
                        self.flush(&mut batch, &mut last_flush).await;
                    }
                }
                Some(delivery) => {
                    match codec::decode::<IndexRequest>(&delivery.payload) {
                        Err(err) => {
                            warn!(%err, "malformed index request, dead-lettering");
                            let _ = bus::publish_dlq(
                                self.bus.as_ref(),
                                subjects::INDEX_REQUEST,
                                &delivery.payload,
                            )
                            .await;
                            let _ = delivery.ack().await;
                        }
                        Ok(env) => match env.data {
                            None => {
                                let _ = delivery.ack().await;
                            }
                            Some(data) => {
                                batch.push((delivery, data));
                                if batch.len() >= self.bulk_max {
                                    self.flush(&mut batch, &mut last_flush).await;
                                }
                            }
                        },
                    }
                }
            }
        }
    }

    /// Flush the batch. On batch-level failure the entries are retained (and
    /// stay unacked) so the next interval retries them.
    pub async fn flush(
        &self,
        batch: &mut Vec<(Delivery, IndexRequestData)>,
        last_flush: &mut Instant,
    ) {
        if batch.is_empty() {
            return;
        }

        let ops: Vec<BulkOp> = batch
            .iter()
            .map(|(_, data)| BulkOp {
                index: data.index.clone(),
                doc_id: data.doc_id.clone(),
                document_json: data.document_json.clone(),
            })
            .collect();

        let summary = match self.search.bulk(&ops).await {
            Ok(summary) => summary,
            Err(err) => {
                error!(%err, size = batch.len(), "bulk write failed, batch retained");
                return;
            }
        };

        let mut failed = 0usize;
        for ((delivery, data), item) in batch.drain(..).zip(summary.items) {
            if item.is_success() {
                if let Err(err) = delivery.ack().await {
                    warn!(%err, "ack failed");
                }
                continue;
            }

            failed += 1;
            error!(
                doc_id = %data.doc_id,
                status = item.status,
                error = item.error.as_deref().unwrap_or(""),
                "bulk item failed, dead-lettering"
            );
            let _ = bus::publish_dlq(self.bus.as_ref(), subjects::INDEX_REQUEST, &delivery.payload)
                .await;
            let _ = delivery.ack().await;
        }

        if failed > 0 {
            warn!(failed, "bulk had item failures");
        }
        *last_flush = Instant::now();
    }
}
