//! Envelope and payload message types for every pipeline subject.
//!
//! Every inter-stage message shares the same envelope shape: schema version,
//! opaque message id, RFC3339-nanos emission timestamp, optional trace
//! context, and a typed payload under `data`. Field tags are fixed; unknown
//! fields are skipped on decode, which keeps the schema forward-compatible.
//!
//! The types are hand-derived with prost rather than generated from a
//! `.proto` file so the build needs no protoc toolchain.

/// W3C-style trace context carried across stages.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TraceContext {
    #[prost(string, tag = "1")]
    pub traceparent: String,
    #[prost(string, tag = "2")]
    pub tracestate: String,
}

/// An identifier observed somewhere on the network.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CidDiscovered {
    #[prost(int32, tag = "1")]
    pub v: i32,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(string, tag = "3")]
    pub ts: String,
    #[prost(message, optional, tag = "4")]
    pub trace: Option<TraceContext>,
    #[prost(message, optional, tag = "5")]
    pub data: Option<CidDiscoveredData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CidDiscoveredData {
    /// Bare CID string, `/ipfs/<cid>[/subpath]`, or `/ipns/<name>`.
    #[prost(string, tag = "1")]
    pub cid_or_path: String,
    /// One of `pubsub`, `dht`, `ipns-dht`, `ipns-pubsub`, `ipns`.
    #[prost(string, tag = "2")]
    pub source: String,
    /// Stage-specific detail, e.g. `datastore_put:providers` or a topic name.
    #[prost(string, tag = "3")]
    pub source_detail: String,
    #[prost(string, tag = "4")]
    pub peer_id: String,
    #[prost(string, repeated, tag = "5")]
    pub remote_addrs: Vec<String>,
    #[prost(string, tag = "6")]
    pub observed_at: String,
}

/// A scheduled fetch job for one `(root, path)` target.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchRequest {
    #[prost(int32, tag = "1")]
    pub v: i32,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(string, tag = "3")]
    pub ts: String,
    #[prost(message, optional, tag = "4")]
    pub trace: Option<TraceContext>,
    #[prost(message, optional, tag = "5")]
    pub data: Option<FetchRequestData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchRequestData {
    #[prost(string, tag = "1")]
    pub root_cid: String,
    #[prost(string, tag = "2")]
    pub path: String,
    #[prost(string, tag = "3")]
    pub observed_at: String,
    #[prost(message, optional, tag = "4")]
    pub limits: Option<FetchLimits>,
    #[prost(message, optional, tag = "5")]
    pub policy: Option<FetchPolicy>,
    #[prost(message, optional, tag = "6")]
    pub content: Option<FetchContent>,
}

/// Per-job resource budget. Zero disables the corresponding limit.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchLimits {
    #[prost(int64, tag = "1")]
    pub max_total_bytes: i64,
    #[prost(int64, tag = "2")]
    pub max_file_bytes: i64,
    #[prost(int64, tag = "3")]
    pub max_dag_nodes: i64,
    #[prost(int64, tag = "4")]
    pub max_depth: i64,
    #[prost(int64, tag = "5")]
    pub timeout_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchPolicy {
    #[prost(string, repeated, tag = "1")]
    pub skip_ext: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    pub skip_mime_prefix: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchContent {
    #[prost(int64, tag = "1")]
    pub inline_max_bytes: i64,
}

/// One traversal result per visited DAG node.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchResult {
    #[prost(int32, tag = "1")]
    pub v: i32,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(string, tag = "3")]
    pub ts: String,
    #[prost(message, optional, tag = "4")]
    pub trace: Option<TraceContext>,
    #[prost(message, optional, tag = "5")]
    pub data: Option<FetchResultData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchResultData {
    #[prost(string, tag = "1")]
    pub root_cid: String,
    #[prost(string, tag = "2")]
    pub path: String,
    /// `file`, `dir`, or `unknown`.
    #[prost(string, tag = "3")]
    pub node_type: String,
    #[prost(int64, tag = "4")]
    pub size_bytes: i64,
    #[prost(string, tag = "5")]
    pub mime: String,
    #[prost(string, tag = "6")]
    pub ext: String,
    #[prost(message, optional, tag = "7")]
    pub content: Option<FetchContentResult>,
    #[prost(message, optional, tag = "8")]
    pub directory: Option<FetchDirectory>,
    /// `ok`, `skipped`, or `failed`.
    #[prost(string, tag = "9")]
    pub status: String,
    #[prost(string, tag = "10")]
    pub skip_reason: String,
    #[prost(string, tag = "11")]
    pub error: String,
    #[prost(string, tag = "12")]
    pub fetched_at: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchContentResult {
    /// `inline` or `none`.
    #[prost(string, tag = "1")]
    pub mode: String,
    #[prost(string, tag = "2")]
    pub inline_base64: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchDirectory {
    #[prost(string, repeated, tag = "1")]
    pub entries: Vec<String>,
    #[prost(bool, tag = "2")]
    pub truncated: bool,
}

/// Request for an out-of-band content stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamGet {
    #[prost(int32, tag = "1")]
    pub v: i32,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(string, tag = "3")]
    pub ts: String,
    #[prost(message, optional, tag = "4")]
    pub trace: Option<TraceContext>,
    #[prost(message, optional, tag = "5")]
    pub data: Option<StreamGetData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamGetData {
    /// Requester-allocated stream id; chunks are published on
    /// `stream.chunk.<stream_id>`.
    #[prost(string, tag = "1")]
    pub stream_id: String,
    #[prost(string, tag = "2")]
    pub root_cid: String,
    #[prost(string, tag = "3")]
    pub path: String,
    #[prost(int64, tag = "4")]
    pub max_bytes: i64,
}

/// One chunk of a content stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamChunk {
    #[prost(int32, tag = "1")]
    pub v: i32,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(string, tag = "3")]
    pub ts: String,
    #[prost(message, optional, tag = "4")]
    pub trace: Option<TraceContext>,
    #[prost(message, optional, tag = "5")]
    pub data: Option<StreamChunkData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamChunkData {
    #[prost(string, tag = "1")]
    pub stream_id: String,
    /// Monotonic from 1. The terminal chunk carries `eof=true` or an error.
    #[prost(int64, tag = "2")]
    pub seq: i64,
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
    #[prost(bool, tag = "4")]
    pub eof: bool,
    #[prost(string, tag = "5")]
    pub error: String,
}

/// A document extracted from fetched content, ready for index shaping.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DocReady {
    #[prost(int32, tag = "1")]
    pub v: i32,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(string, tag = "3")]
    pub ts: String,
    #[prost(message, optional, tag = "4")]
    pub trace: Option<TraceContext>,
    #[prost(message, optional, tag = "5")]
    pub data: Option<DocReadyData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DocReadyData {
    #[prost(string, tag = "1")]
    pub root_cid: String,
    #[prost(string, tag = "2")]
    pub path: String,
    #[prost(string, tag = "3")]
    pub node_type: String,
    #[prost(string, tag = "4")]
    pub filename: String,
    #[prost(string, tag = "5")]
    pub ext: String,
    #[prost(string, tag = "6")]
    pub mime: String,
    #[prost(int64, tag = "7")]
    pub size_bytes: i64,
    #[prost(bool, tag = "8")]
    pub content_indexed: bool,
    #[prost(string, tag = "9")]
    pub text: String,
    #[prost(bool, tag = "10")]
    pub text_truncated: bool,
    /// Filename copy used as a relevance aid for name search.
    #[prost(string, tag = "11")]
    pub names_text: String,
    #[prost(string, repeated, tag = "12")]
    pub sources: Vec<String>,
    #[prost(string, tag = "13")]
    pub observed_at: String,
    #[prost(string, tag = "14")]
    pub processed_at: String,
}

/// A single upsert against the search engine.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IndexRequest {
    #[prost(int32, tag = "1")]
    pub v: i32,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(string, tag = "3")]
    pub ts: String,
    #[prost(message, optional, tag = "4")]
    pub trace: Option<TraceContext>,
    #[prost(message, optional, tag = "5")]
    pub data: Option<IndexRequestData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IndexRequestData {
    /// Index or write-alias name.
    #[prost(string, tag = "1")]
    pub index: String,
    #[prost(string, tag = "2")]
    pub doc_id: String,
    /// Currently always `index`.
    #[prost(string, tag = "3")]
    pub op: String,
    /// Opaque JSON document matching the engine's strict mapping.
    #[prost(bytes = "vec", tag = "4")]
    pub document_json: Vec<u8>,
}
