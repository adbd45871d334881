//! IPFSniffer pipeline worker.
//!
//! One binary, one role per process. The role is selected with
//! `IPFSNIFFER_WORKER_ROLE` (or `--role`); multiple processes sharing a role
//! divide the subject between them through the shared durable consumer.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ipfsniffer_core::config::Config;
use ipfsniffer_index::{mapping, SearchClient};
use ipfsniffer_pipeline::bus::{Bus, NatsBus};
use ipfsniffer_pipeline::dedupe::{
    Dedupe, DedupeStore, RedisDedupeStore, SEEN_CID_PREFIX, SEEN_FETCH_PREFIX,
    SEEN_IPNS_DHT_PREFIX, SEEN_IPNS_PUBSUB_PREFIX,
};
use ipfsniffer_pipeline::discovery::{
    DhtWorker, IpnsDhtWorker, IpnsPubsubWorker, IpnsResolverWorker, PubsubWorker,
};
use ipfsniffer_pipeline::enqueue::FetchEnqueuer;
use ipfsniffer_pipeline::extractor::Extractor;
use ipfsniffer_pipeline::fetcher::{Fetcher, StreamServer};
use ipfsniffer_pipeline::indexer::Indexer;
use ipfsniffer_pipeline::indexprep::IndexPrep;
use ipfsniffer_pipeline::node::http::HttpNode;
use ipfsniffer_pipeline::node::{DhtHost, PeerNode};
use ipfsniffer_pipeline::tika::TikaClient;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Role {
    DiscoveryPubsub,
    DiscoveryDht,
    DiscoveryIpnsDht,
    DiscoveryIpnsPubsub,
    ResolverIpns,
    EnqueueFetch,
    Fetcher,
    StreamServer,
    Extractor,
    IndexPrep,
    Indexer,
}

/// IPFSniffer pipeline worker.
#[derive(Parser, Debug)]
#[command(name = "ipfsniffer-worker")]
#[command(about = "Discovery-to-index pipeline worker", long_about = None)]
struct Args {
    /// Worker role for this process.
    #[arg(long, value_enum, env = "IPFSNIFFER_WORKER_ROLE", default_value = "discovery-pubsub")]
    role: Role,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = Config::from_env().context("load config")?;

    let bus = Arc::new(NatsBus::connect(&cfg.bus).await.context("bus connect")?);
    bus.ensure_stream().await.context("ensure stream")?;
    let bus: Arc<dyn Bus> = bus;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    info!(env = %cfg.service.env, role = ?args.role, "worker started");

    match args.role {
        Role::DiscoveryPubsub => {
            let worker = PubsubWorker {
                node: peer_node(&cfg)?,
                bus,
                store: dedupe_store(&cfg).await?,
                topics: cfg.discovery.pubsub_topics.clone(),
                dedupe: Dedupe::new(SEEN_CID_PREFIX, cfg.discovery.dedupe_ttl),
            };
            worker.run(shutdown).await?;
        }
        Role::DiscoveryDht => {
            let worker = DhtWorker {
                host: embedded_dht_host(&cfg)?,
                bus,
                store: dedupe_store(&cfg).await?,
                dedupe: Dedupe::new(SEEN_CID_PREFIX, cfg.discovery.dedupe_ttl),
            };
            worker.run(shutdown).await?;
        }
        Role::DiscoveryIpnsDht => {
            let worker = IpnsDhtWorker {
                host: embedded_dht_host(&cfg)?,
                bus,
                store: dedupe_store(&cfg).await?,
                dedupe: Dedupe::new(SEEN_IPNS_DHT_PREFIX, cfg.discovery.dedupe_ttl),
            };
            worker.run(shutdown).await?;
        }
        Role::DiscoveryIpnsPubsub => {
            let worker = IpnsPubsubWorker {
                node: peer_node(&cfg)?,
                bus,
                store: dedupe_store(&cfg).await?,
                names: cfg.discovery.ipns_pubsub_names.clone(),
                poll: cfg.discovery.ipns_pubsub_poll,
                dedupe: Dedupe::new(SEEN_IPNS_PUBSUB_PREFIX, cfg.discovery.dedupe_ttl),
            };
            worker.run(shutdown).await?;
        }
        Role::ResolverIpns => {
            let worker = IpnsResolverWorker::new(peer_node(&cfg)?, bus);
            worker.run(shutdown).await?;
        }
        Role::EnqueueFetch => {
            let worker = FetchEnqueuer {
                bus,
                store: dedupe_store(&cfg).await?,
                durable: "enqueue-fetch".into(),
                dedupe: Dedupe::new(SEEN_FETCH_PREFIX, cfg.discovery.dedupe_ttl),
                fetch: cfg.fetch.clone(),
                inline_max_bytes: cfg.fetch.inline_max_bytes,
            };
            worker.run(shutdown).await?;
        }
        Role::Fetcher => {
            let worker = Fetcher::new(peer_node(&cfg)?, bus);
            worker.run(shutdown).await?;
        }
        Role::StreamServer => {
            let mut worker = StreamServer::new(peer_node(&cfg)?, bus);
            worker.chunk_size = cfg.stream.chunk_size;
            worker.default_max_bytes = cfg.stream.max_bytes;
            worker.run(shutdown).await?;
        }
        Role::Extractor => {
            let tika = TikaClient::new(&cfg.tika.url).context("tika client")?;
            let mut worker = Extractor::new(bus, tika);
            worker.tika_timeout = cfg.tika.timeout;
            worker.max_text_bytes = cfg.tika.max_text_bytes;
            worker.stream_max_bytes = cfg.stream.max_bytes;
            worker.run(shutdown).await?;
        }
        Role::IndexPrep => {
            let worker = IndexPrep::new(bus, &cfg.search.index);
            worker.run(shutdown).await?;
        }
        Role::Indexer => {
            let search =
                SearchClient::new(&cfg.search.url, &cfg.search.index).context("search client")?;
            if let Err(err) = search
                .ensure_index(mapping::DEFAULT_MAPPING_JSON, &cfg.search.alias)
                .await
            {
                tracing::warn!(%err, "ensure index failed, continuing");
            }
            let worker = Indexer::new(bus, search);
            worker.run(shutdown).await?;
        }
    }

    info!("worker shutting down");
    Ok(())
}

fn peer_node(cfg: &Config) -> anyhow::Result<Arc<dyn PeerNode>> {
    let node = HttpNode::new(&cfg.node.api_url).context("peer node client")?;
    Ok(Arc::new(node))
}

/// The DHT discovery roles hook the node's routing internals (datastore,
/// provider store), which only an embedded node exposes; the RPC surface
/// has no equivalent. Deployments run these roles inside the node process.
fn embedded_dht_host(_cfg: &Config) -> anyhow::Result<Arc<dyn DhtHost>> {
    anyhow::bail!("no embedded DHT host is available over the node RPC API")
}

async fn dedupe_store(cfg: &Config) -> anyhow::Result<Arc<dyn DedupeStore>> {
    let store = RedisDedupeStore::connect(&cfg.redis.url)
        .await
        .context("redis connect")?;
    Ok(Arc::new(store))
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        shutdown.cancel();
    });
}

