//! Discovery-to-index pipeline workers for the IPFSniffer system.
//!
//! The pipeline is a chain of single-purpose workers connected by durable
//! subjects on a shared message bus:
//!
//! ```text
//! [discovery workers] → cid.discovered → [enqueue] → fetch.request
//!        → [fetcher] → fetch.result → [extractor] → doc.ready
//!        → [index-prep] → index.request → [indexer] → search engine
//! ```
//!
//! A separate stream sub-protocol (`stream.get` / `stream.chunk.<id>`)
//! carries bulk file bytes from the stream server to the extractor.
//!
//! # Modules
//!
//! - [`bus`] - durable at-least-once bus interface with NATS JetStream and
//!   in-memory backends
//! - [`dedupe`] - TTL'd set-if-absent dedup with Redis and in-memory backends
//! - [`node`] - the embedded peer node's interface (datastore, validator,
//!   provider store, DAG service) plus the RPC-backed implementation
//! - [`sniff`] - wrappers that observe node internals and publish
//!   `cid.discovered` without perturbing the wrapped operation
//! - [`discovery`] - pubsub / DHT / IPNS discovery workers and the IPNS
//!   resolver
//! - [`enqueue`] / [`fetcher`] / [`extractor`] / [`indexprep`] / [`indexer`] -
//!   the pipeline stages proper

pub mod bus;
pub mod dedupe;
pub mod discovery;
pub mod enqueue;
mod error;
pub mod extractor;
pub mod fetcher;
pub mod indexer;
pub mod indexprep;
pub mod node;
pub mod sniff;
pub mod tika;

pub use error::{Error, Result};
