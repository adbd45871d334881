//! Extractor worker: turns successful fetch results into `doc.ready`
//! documents, obtaining text from the extraction service.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ipfsniffer_core::proto::{DocReady, DocReadyData, FetchResult, StreamGet, StreamGetData};
use ipfsniffer_core::{codec, new_message_id, now_rfc3339, subjects, ENVELOPE_VERSION};

use crate::bus::{self, Bus};
use crate::fetcher::stream_reader::chunk_stream;
use crate::tika::TikaClient;
use crate::{Error, Result};

const PULL_WAIT: Duration = Duration::from_secs(2);

/// Fallback byte cap for streamed files whose size is unknown.
pub const DEFAULT_STREAM_MAX_BYTES: i64 = 10 * 1024 * 1024;

pub struct Extractor {
    pub bus: Arc<dyn Bus>,
    pub tika: TikaClient,

    pub durable: String,

    pub tika_timeout: Duration,
    pub max_text_bytes: i64,
    pub stream_max_bytes: i64,
}

impl Extractor {
    pub fn new(bus: Arc<dyn Bus>, tika: TikaClient) -> Extractor {
        Extractor {
            bus,
            tika,
            durable: "extractor".to_string(),
            tika_timeout: Duration::from_secs(60),
            max_text_bytes: 2_000_000,
            stream_max_bytes: DEFAULT_STREAM_MAX_BYTES,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(subject = subjects::FETCH_RESULT, durable = %self.durable, "extractor started");

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                delivery = self.bus.pull(subjects::FETCH_RESULT, &self.durable, PULL_WAIT) => delivery?,
            };
            let Some(delivery) = delivery else { continue };

            match self.handle(&delivery.payload).await {
                Ok(()) => {
                    if let Err(err) = delivery.ack().await {
                        warn!(%err, "ack failed");
                    }
                }
                Err(err) if err.is_malformed_payload() => {
                    warn!(%err, "malformed fetch result, dead-lettering");
                    let _ =
                        bus::publish_dlq(self.bus.as_ref(), subjects::FETCH_RESULT, &delivery.payload)
                            .await;
                    let _ = delivery.ack().await;
                }
                Err(err) => {
                    error!(%err, "handle fetch result");
                }
            }
        }
    }

    pub async fn handle(&self, payload: &[u8]) -> Result<()> {
        let fr: FetchResult = codec::decode(payload)?;
        let Some(d) = fr.data else { return Ok(()) };

        // Failed/skipped results are extremely common when sniffing the open
        // network; indexing them would flood the engine with empty docs.
        let status = d.status.trim().to_lowercase();
        if !status.is_empty() && status != "ok" {
            return Ok(());
        }

        let mut content_indexed = false;
        let mut text = String::new();
        let mut text_truncated = false;

        if d.node_type == "file" {
            let body = self.content_body(&d).await?;
            match self.tika.extract_text(body, self.tika_timeout, self.max_text_bytes).await {
                Ok(res) => {
                    content_indexed = true;
                    text = res.text;
                    text_truncated = res.truncated;
                }
                Err(err) => {
                    // Unsupported MIME types are routine; never stall the
                    // pipeline on them.
                    warn!(root_cid = %d.root_cid, path = %d.path, %err,
                        "extraction failed, continuing without text");
                }
            }
        }

        let filename = filename_from_path(&d.path);
        let out = DocReady {
            v: ENVELOPE_VERSION,
            id: new_message_id(),
            ts: now_rfc3339(),
            trace: fr.trace,
            data: Some(DocReadyData {
                root_cid: d.root_cid.clone(),
                path: d.path.clone(),
                node_type: d.node_type.clone(),
                filename: filename.clone(),
                ext: d.ext.clone(),
                mime: d.mime.clone(),
                size_bytes: d.size_bytes,
                content_indexed,
                text,
                text_truncated,
                names_text: filename,
                sources: Vec::new(),
                observed_at: String::new(),
                processed_at: now_rfc3339(),
            }),
        };

        let payload = codec::encode(&out)?;
        if let Err(err) = bus::publish(self.bus.as_ref(), subjects::DOC_READY, &payload).await {
            let _ = bus::publish_dlq(self.bus.as_ref(), subjects::DOC_READY, &payload).await;
            return Err(err);
        }
        Ok(())
    }

    /// Content body for extraction: inline bytes when present, otherwise a
    /// pull over the stream side-channel.
    async fn content_body(
        &self,
        d: &ipfsniffer_core::proto::FetchResultData,
    ) -> Result<reqwest::Body> {
        let content = d.content.clone().unwrap_or_default();
        if content.mode == "inline" {
            let raw = BASE64
                .decode(content.inline_base64.as_bytes())
                .map_err(|err| Error::Extract(format!("inline content: {err}")))?;
            return Ok(reqwest::Body::from(raw));
        }

        let max_bytes = if d.size_bytes > 0 { d.size_bytes } else { self.stream_max_bytes };

        // Subscribe before publishing the request so no chunk can be missed.
        let stream_id = new_message_id();
        let sub = self
            .bus
            .subscribe(&subjects::stream_chunk_subject(&stream_id))
            .await?;

        let get = StreamGet {
            v: ENVELOPE_VERSION,
            id: new_message_id(),
            ts: now_rfc3339(),
            trace: None,
            data: Some(StreamGetData {
                stream_id,
                root_cid: d.root_cid.clone(),
                path: d.path.clone(),
                max_bytes,
            }),
        };
        let payload = codec::encode(&get)?;
        bus::publish(self.bus.as_ref(), subjects::STREAM_GET, &payload).await?;

        Ok(reqwest::Body::wrap_stream(chunk_stream(sub)))
    }
}

fn filename_from_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((_, name)) => name.to_string(),
        None => trimmed.to_string(),
    }
}
