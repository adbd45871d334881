//! Index-prep worker: shapes `doc.ready` into engine documents.
//!
//! The document matches the engine's strict mapping field-for-field; beyond
//! field naming there is no projection or interpretation here.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ipfsniffer_core::proto::{DocReady, IndexRequest, IndexRequestData};
use ipfsniffer_core::{codec, docid, new_message_id, now_rfc3339, subjects, ENVELOPE_VERSION};

use crate::bus::{self, Bus};
use crate::Result;

const PULL_WAIT: Duration = Duration::from_secs(2);

pub struct IndexPrep {
    pub bus: Arc<dyn Bus>,
    pub durable: String,
    /// Index or write-alias the documents target.
    pub index_name: String,
}

impl IndexPrep {
    pub fn new(bus: Arc<dyn Bus>, index_name: &str) -> IndexPrep {
        IndexPrep {
            bus,
            durable: "index-prep".to_string(),
            index_name: index_name.to_string(),
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(subject = subjects::DOC_READY, durable = %self.durable, index = %self.index_name, "index-prep started");

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                delivery = self.bus.pull(subjects::DOC_READY, &self.durable, PULL_WAIT) => delivery?,
            };
            let Some(delivery) = delivery else { continue };

            match self.handle(&delivery.payload).await {
                Ok(()) => {
                    if let Err(err) = delivery.ack().await {
                        warn!(%err, "ack failed");
                    }
                }
                Err(err) if err.is_malformed_payload() => {
                    warn!(%err, "malformed doc.ready, dead-lettering");
                    let _ = bus::publish_dlq(self.bus.as_ref(), subjects::DOC_READY, &delivery.payload)
                        .await;
                    let _ = delivery.ack().await;
                }
                Err(err) => {
                    error!(%err, "handle doc.ready");
                }
            }
        }
    }

    pub async fn handle(&self, payload: &[u8]) -> Result<()> {
        let inbound: DocReady = codec::decode(payload)?;
        let Some(d) = inbound.data else { return Ok(()) };

        let doc_id = docid::for_root_and_path(&d.root_cid, &d.path);

        let document = json!({
            "doc_id": doc_id,
            "root_cid": d.root_cid,
            "cid": "",
            "path": d.path,
            "path_text": d.path,
            "filename": d.filename,
            "filename_text": d.filename,
            "node_type": d.node_type,
            "ext": d.ext,
            "mime": d.mime,
            "size_bytes": d.size_bytes,
            "content_indexed": d.content_indexed,
            "skip_reason": "",
            "text": d.text,
            "text_truncated": d.text_truncated,
            "names_text": d.names_text,
            "discovered_at": null,
            "fetched_at": null,
            "processed_at": d.processed_at,
            "sources": d.sources,
            "ipns_name": "",
            "dir": {
                "entries_count": 0,
                "entries_truncated": false,
            },
        });

        let out = IndexRequest {
            v: ENVELOPE_VERSION,
            id: new_message_id(),
            ts: now_rfc3339(),
            trace: inbound.trace,
            data: Some(IndexRequestData {
                index: self.index_name.clone(),
                doc_id,
                op: "index".to_string(),
                document_json: serde_json::to_vec(&document)?,
            }),
        };

        let payload = codec::encode(&out)?;
        if let Err(err) = bus::publish(self.bus.as_ref(), subjects::INDEX_REQUEST, &payload).await {
            let _ = bus::publish_dlq(self.bus.as_ref(), subjects::INDEX_REQUEST, &payload).await;
            return Err(err);
        }
        Ok(())
    }
}
