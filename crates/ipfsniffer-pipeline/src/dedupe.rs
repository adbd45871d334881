//! TTL'd deduplication on a shared key-value store.
//!
//! A single primitive carries every dedup point in the pipeline:
//! `seen(key)` marks the key with a TTL and reports whether it already
//! existed. Races are benign; the set-if-absent is atomic and at most one of
//! N concurrent workers wins the insert.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::{Error, Result};

/// Dedup prefix for discovered identifiers.
pub const SEEN_CID_PREFIX: &str = "ipfsniffer:seen:cid";
/// Dedup prefix for fetch targets.
pub const SEEN_FETCH_PREFIX: &str = "ipfsniffer:seen:fetch";
/// Dedup prefix for IPNS names observed via the DHT.
pub const SEEN_IPNS_DHT_PREFIX: &str = "ipfsniffer:seen:ipns:dht";
/// Dedup prefix for IPNS names observed via pubsub.
pub const SEEN_IPNS_PUBSUB_PREFIX: &str = "ipfsniffer:seen:ipns:pubsub";

/// Default dedup window.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Atomic set-if-absent with expiry.
#[async_trait]
pub trait DedupeStore: Send + Sync {
    /// Returns true when the key was newly set, false when it already
    /// existed inside its TTL window.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool>;
}

/// A dedup point: a key namespace plus its TTL.
#[derive(Debug, Clone)]
pub struct Dedupe {
    pub prefix: String,
    pub ttl: Duration,
}

impl Dedupe {
    pub fn new(prefix: &str, ttl: Duration) -> Dedupe {
        Dedupe { prefix: prefix.to_string(), ttl }
    }

    /// Derived dedup point under this one, e.g. per wrapped datastore.
    pub fn nested(&self, suffix: &str) -> Dedupe {
        Dedupe { prefix: format!("{}:{}", self.prefix, suffix), ttl: self.ttl }
    }

    /// Returns true if the key was already marked. Marks it otherwise.
    pub async fn seen(&self, store: &dyn DedupeStore, key: &str) -> Result<bool> {
        if key.is_empty() {
            return Err(Error::Dedupe("key required".into()));
        }
        let newly_set = store
            .set_if_absent(&format!("{}:{}", self.prefix, key), self.ttl)
            .await?;
        Ok(!newly_set)
    }
}

/// In-memory store used by tests.
#[derive(Default)]
pub struct MemoryDedupeStore {
    entries: Mutex<HashMap<String, Instant>>,
}

impl MemoryDedupeStore {
    pub fn new() -> MemoryDedupeStore {
        MemoryDedupeStore::default()
    }
}

#[async_trait]
impl DedupeStore for MemoryDedupeStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get(key) {
            Some(expiry) if *expiry > now => Ok(false),
            _ => {
                entries.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }
}

/// Redis-backed store (`SET key 1 NX EX ttl`).
#[derive(Clone)]
pub struct RedisDedupeStore {
    conn: ConnectionManager,
}

impl RedisDedupeStore {
    pub async fn connect(url: &str) -> Result<RedisDedupeStore> {
        let client = redis::Client::open(url).map_err(|e| Error::Dedupe(format!("open: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Dedupe(format!("connect {url}: {e}")))?;
        info!(url, "dedupe store connected");
        Ok(RedisDedupeStore { conn })
    }
}

#[async_trait]
impl DedupeStore for RedisDedupeStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let res: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Dedupe(format!("setnx: {e}")))?;
        // Some("OK") means the key was set; Nil means it already existed.
        Ok(res.is_some())
    }
}
