//! HTTP client for an OpenSearch-compatible engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_json::value::RawValue;
use tracing::{debug, info};

use crate::query::{build_query, highlight_spec, parse_sort, SearchParams};
use crate::{Error, Result};

/// Thin client over the engine's REST API.
///
/// `index` may be a physical index name or an alias. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    base_url: String,
    index: String,
}

/// One document upsert in a bulk request.
#[derive(Debug, Clone)]
pub struct BulkOp {
    pub index: String,
    pub doc_id: String,
    /// Raw JSON document; passed through without interpretation.
    pub document_json: Vec<u8>,
}

/// Per-item outcome of a bulk request, in request order.
#[derive(Debug, Clone)]
pub struct BulkItemResult {
    pub status: u16,
    pub error: Option<String>,
}

impl BulkItemResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outcome of a whole bulk request.
#[derive(Debug, Clone)]
pub struct BulkSummary {
    pub errors: bool,
    pub items: Vec<BulkItemResult>,
}

/// A search response shaped for the query API.
#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub total: i64,
    pub from: i64,
    pub size: i64,
    pub hits: Vec<Hit>,
}

#[derive(Debug, Serialize)]
pub struct Hit {
    pub id: String,
    pub score: f32,
    pub doc: Box<RawValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Deserialize)]
struct EngineSearchResponse {
    hits: EngineHits,
}

#[derive(Debug, Deserialize)]
struct EngineHits {
    total: EngineTotal,
    hits: Vec<EngineHit>,
}

#[derive(Debug, Deserialize)]
struct EngineTotal {
    value: i64,
}

#[derive(Debug, Deserialize)]
struct EngineHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f32>,
    #[serde(rename = "_source")]
    source: Box<RawValue>,
    highlight: Option<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Deserialize)]
struct EngineBulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, EngineBulkItem>>,
}

#[derive(Debug, Deserialize)]
struct EngineBulkItem {
    #[serde(default)]
    status: u16,
    error: Option<EngineBulkError>,
}

#[derive(Debug, Deserialize)]
struct EngineBulkError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct EngineGetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<Box<RawValue>>,
}

impl SearchClient {
    pub fn new(base_url: &str, index: &str) -> Result<SearchClient> {
        if base_url.is_empty() {
            return Err(Error::Config("engine url required".into()));
        }
        if index.is_empty() {
            return Err(Error::Config("index required".into()));
        }
        Ok(SearchClient {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
        })
    }

    /// Create the index with the given mapping if it does not exist, and
    /// point `alias` at it either way.
    pub async fn ensure_index(&self, mapping_json: &str, alias: &str) -> Result<()> {
        let url = format!("{}/{}", self.base_url, self.index);
        let head = self.http.head(&url).send().await?;
        match head.status().as_u16() {
            200 => return self.ensure_alias(alias).await,
            404 => {}
            code => return Err(Error::Status(code)),
        }

        info!(index = %self.index, "creating index");
        let resp = self
            .http
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(mapping_json.to_string())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Status(resp.status().as_u16()));
        }

        self.ensure_alias(alias).await
    }

    async fn ensure_alias(&self, alias: &str) -> Result<()> {
        if alias.is_empty() {
            return Ok(());
        }
        let body = json!({
            "actions": [
                { "add": { "index": self.index, "alias": alias } }
            ]
        });
        let resp = self
            .http
            .post(format!("{}/_aliases", self.base_url))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Status(resp.status().as_u16()));
        }
        Ok(())
    }

    /// Issue a bulk of index ops. Transport and whole-request status errors
    /// fail the call; per-item failures are reported in the summary.
    pub async fn bulk(&self, ops: &[BulkOp]) -> Result<BulkSummary> {
        let mut body = Vec::with_capacity(ops.len() * 256);
        for op in ops {
            let meta = json!({ "index": { "_index": op.index, "_id": op.doc_id } });
            serde_json::to_writer(&mut body, &meta)?;
            body.push(b'\n');
            body.extend_from_slice(&op.document_json);
            body.push(b'\n');
        }

        let resp = self
            .http
            .post(format!("{}/_bulk", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Status(resp.status().as_u16()));
        }

        let parsed: EngineBulkResponse = resp.json().await?;
        if parsed.items.len() != ops.len() {
            return Err(Error::BulkMismatch { got: parsed.items.len(), want: ops.len() });
        }

        let items = parsed
            .items
            .into_iter()
            .map(|entry| {
                // Each entry is keyed by the op, e.g. {"index": {...}}.
                match entry.into_values().next() {
                    Some(item) => BulkItemResult {
                        status: item.status,
                        error: item.error.map(|e| format!("{}: {}", e.kind, e.reason)),
                    },
                    None => BulkItemResult { status: 0, error: Some("empty bulk item".into()) },
                }
            })
            .collect();

        Ok(BulkSummary { errors: parsed.errors, items })
    }

    /// Run a search with the standard query shape, filters, and highlights.
    pub async fn search(&self, mut params: SearchParams) -> Result<SearchResult> {
        params.normalize();

        let query = build_query(&params);
        let sort = parse_sort(&params)?;

        let mut body = json!({
            "from": params.from,
            "size": params.size,
            "track_total_hits": true,
            "query": query,
            "_source": true,
            "highlight": highlight_spec(),
        });
        // Only include sort when present; the engine rejects sort:null.
        if let Some(sort) = sort {
            body["sort"] = sort;
        }

        debug!(q = %params.q, from = params.from, size = params.size, "search");

        let resp = self
            .http
            .post(format!("{}/{}/_search", self.base_url, self.index))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Status(resp.status().as_u16()));
        }

        let parsed: EngineSearchResponse = resp.json().await?;
        let hits = parsed
            .hits
            .hits
            .into_iter()
            .map(|h| Hit {
                id: h.id,
                score: h.score.unwrap_or(0.0),
                doc: h.source,
                highlight: h.highlight,
            })
            .collect();

        Ok(SearchResult {
            total: parsed.hits.total.value,
            from: params.from,
            size: params.size,
            hits,
        })
    }

    /// Fetch one document by id. `Ok(None)` when absent.
    pub async fn get_doc(&self, doc_id: &str) -> Result<Option<Box<RawValue>>> {
        let doc_id = doc_id.trim();
        if doc_id.is_empty() {
            return Err(Error::BadRequest("doc_id required".into()));
        }

        let resp = self
            .http
            .get(format!("{}/{}/_doc/{}", self.base_url, self.index, doc_id))
            .send()
            .await?;
        match resp.status().as_u16() {
            404 => return Ok(None),
            code if !(200..300).contains(&code) => return Err(Error::Status(code)),
            _ => {}
        }

        let parsed: EngineGetResponse = resp.json().await?;
        if !parsed.found {
            return Ok(None);
        }
        Ok(parsed.source)
    }

    /// Index or alias this client reads and writes.
    pub fn index(&self) -> &str {
        &self.index
    }
}
