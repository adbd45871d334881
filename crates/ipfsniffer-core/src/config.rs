//! Environment-driven configuration shared by the server and worker binaries.
//!
//! Every key is prefixed `IPFSNIFFER_`. Malformed numeric values fall back to
//! their defaults, with one deliberate exception: the bus timeout fails
//! startup so a typo there is surfaced instead of silently ignored.

use std::time::Duration;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub bus: BusConfig,
    pub redis: RedisConfig,
    pub discovery: DiscoveryConfig,
    pub fetch: FetchConfig,
    pub stream: StreamConfig,
    pub search: SearchConfig,
    pub tika: TikaConfig,
    pub node: NodeConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub env: String,
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub url: String,
    pub name: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub pubsub_topics: Vec<String>,
    pub dedupe_ttl: Duration,

    /// Seed list of IPNS names polled via the pubsub router. There is no
    /// global IPNS pubsub feed; subscriptions exist per-name only.
    pub ipns_pubsub_names: Vec<String>,
    pub ipns_pubsub_poll: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub max_total_bytes: i64,
    pub max_file_bytes: i64,
    pub max_dag_nodes: i64,
    pub max_depth: i64,
    pub timeout: Duration,
    pub inline_max_bytes: i64,

    pub skip_ext: Vec<String>,
    pub skip_mime_prefix: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Chunk size used by the stream server.
    pub chunk_size: usize,
    /// Cap applied when a stream request carries no limit of its own.
    pub max_bytes: i64,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub url: String,
    pub index: String,
    pub alias: String,
}

#[derive(Debug, Clone)]
pub struct TikaConfig {
    pub url: String,
    pub timeout: Duration,
    pub max_text_bytes: i64,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Peer node RPC endpoint.
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub addr: String,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        let bus_timeout = parse_bus_timeout(&getenv("IPFSNIFFER_BUS_TIMEOUT_MS", ""))?;

        let cfg = Config {
            service: ServiceConfig {
                env: getenv("IPFSNIFFER_ENV", "dev"),
            },
            bus: BusConfig {
                url: getenv("IPFSNIFFER_BUS_URL", "nats://127.0.0.1:4222"),
                name: getenv("IPFSNIFFER_BUS_NAME", "ipfsniffer"),
                timeout: bus_timeout,
            },
            redis: RedisConfig {
                url: getenv("IPFSNIFFER_REDIS_URL", "redis://127.0.0.1:6379"),
            },
            discovery: DiscoveryConfig {
                pubsub_topics: {
                    let topics = split_csv(&getenv("IPFSNIFFER_DISCOVERY_PUBSUB_TOPICS", ""));
                    if topics.is_empty() {
                        vec!["ipfs.pubsub.chat".to_string(), "fil".to_string()]
                    } else {
                        topics
                    }
                },
                dedupe_ttl: Duration::from_secs(getenv_i64(
                    "IPFSNIFFER_DISCOVERY_DEDUPE_TTL_SECS",
                    24 * 60 * 60,
                ) as u64),
                ipns_pubsub_names: split_csv(&getenv("IPFSNIFFER_DISCOVERY_IPNS_PUBSUB_NAMES", "")),
                ipns_pubsub_poll: Duration::from_secs(getenv_i64(
                    "IPFSNIFFER_DISCOVERY_IPNS_PUBSUB_POLL_SECS",
                    10 * 60,
                ) as u64),
            },
            fetch: FetchConfig {
                max_total_bytes: getenv_i64("IPFSNIFFER_FETCH_MAX_TOTAL_BYTES", 100 * 1024 * 1024),
                max_file_bytes: getenv_i64("IPFSNIFFER_FETCH_MAX_FILE_BYTES", 10 * 1024 * 1024),
                max_dag_nodes: getenv_i64("IPFSNIFFER_FETCH_MAX_DAG_NODES", 200_000),
                max_depth: getenv_i64("IPFSNIFFER_FETCH_MAX_DEPTH", 64),
                timeout: Duration::from_millis(getenv_i64(
                    "IPFSNIFFER_FETCH_TIMEOUT_MS",
                    10 * 60 * 1000,
                ) as u64),
                inline_max_bytes: getenv_i64("IPFSNIFFER_FETCH_INLINE_MAX_BYTES", 256 * 1024),
                skip_ext: split_csv(&getenv(
                    "IPFSNIFFER_FETCH_SKIP_EXT",
                    ".zip,.tar,.gz,.tgz,.mp4,.mp3,.png,.jpg,.jpeg,.gif,.webp",
                )),
                skip_mime_prefix: split_csv(&getenv(
                    "IPFSNIFFER_FETCH_SKIP_MIME_PREFIX",
                    "video/,audio/,image/",
                )),
            },
            stream: StreamConfig {
                chunk_size: getenv_i64("IPFSNIFFER_STREAM_CHUNK_SIZE", 32 * 1024) as usize,
                max_bytes: getenv_i64("IPFSNIFFER_STREAM_MAX_BYTES", 10 * 1024 * 1024),
            },
            search: SearchConfig {
                url: getenv("IPFSNIFFER_SEARCH_URL", "http://127.0.0.1:9200"),
                index: getenv("IPFSNIFFER_SEARCH_INDEX", "ipfsniffer-docs-v1"),
                alias: getenv("IPFSNIFFER_SEARCH_ALIAS", "ipfsniffer-docs"),
            },
            tika: TikaConfig {
                url: getenv("IPFSNIFFER_TIKA_URL", "http://127.0.0.1:9998"),
                timeout: Duration::from_millis(
                    getenv_i64("IPFSNIFFER_TIKA_TIMEOUT_MS", 60_000) as u64
                ),
                max_text_bytes: getenv_i64("IPFSNIFFER_TIKA_MAX_TEXT_BYTES", 2_000_000),
            },
            node: NodeConfig {
                api_url: getenv("IPFSNIFFER_NODE_API_URL", "http://127.0.0.1:5001"),
            },
            http: HttpConfig {
                addr: getenv("IPFSNIFFER_HTTP_ADDR", "127.0.0.1:8080"),
            },
        };

        Ok(cfg)
    }
}

/// The one strict numeric parse: a typo here fails startup instead of
/// silently running with the default.
fn parse_bus_timeout(value: &str) -> Result<Duration> {
    if value.is_empty() {
        return Ok(Duration::from_millis(5_000));
    }
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|err| Error::Config(format!("IPFSNIFFER_BUS_TIMEOUT_MS: {err}")))
}

fn getenv(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) => {
            let v = v.trim().to_string();
            if v.is_empty() {
                default.to_string()
            } else {
                v
            }
        }
        Err(_) => default.to_string(),
    }
}

fn getenv_i64(key: &str, default: i64) -> i64 {
    let v = getenv(key, "");
    if v.is_empty() {
        return default;
    }
    v.parse().unwrap_or(default)
}

fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them on distinct keys so they
    // don't race under the parallel test runner.

    #[test]
    fn defaults_apply_without_env() {
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.bus.url, "nats://127.0.0.1:4222");
        assert_eq!(cfg.fetch.max_dag_nodes, 200_000);
        assert_eq!(cfg.fetch.max_depth, 64);
        assert_eq!(cfg.stream.chunk_size, 32 * 1024);
        assert_eq!(cfg.search.index, "ipfsniffer-docs-v1");
        assert_eq!(cfg.discovery.pubsub_topics, vec!["ipfs.pubsub.chat", "fil"]);
        assert!(!cfg.fetch.skip_ext.is_empty());
    }

    #[test]
    fn malformed_numeric_falls_back_to_default() {
        std::env::set_var("IPFSNIFFER_FETCH_MAX_DEPTH", "not-a-number");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.fetch.max_depth, 64);
        std::env::remove_var("IPFSNIFFER_FETCH_MAX_DEPTH");
    }

    #[test]
    fn malformed_bus_timeout_fails_startup() {
        let err = parse_bus_timeout("five seconds").unwrap_err();
        assert!(err.to_string().contains("IPFSNIFFER_BUS_TIMEOUT_MS"));
        assert_eq!(parse_bus_timeout("").unwrap(), Duration::from_millis(5_000));
        assert_eq!(parse_bus_timeout("250").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn csv_splitting_trims_and_drops_empties() {
        assert_eq!(split_csv(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_csv("").is_empty());
    }
}
