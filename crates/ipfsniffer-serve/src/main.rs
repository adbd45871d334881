//! IPFSniffer query API server.

use anyhow::Context;
use axum::http::Request;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use ipfsniffer_core::config::Config;
use ipfsniffer_index::SearchClient;
use ipfsniffer_serve::{router, AppState};

/// IPFSniffer query API server.
#[derive(Parser, Debug)]
#[command(name = "ipfsniffer-serve")]
#[command(about = "Read-only HTTP query API for the IPFSniffer index", long_about = None)]
struct Args {
    /// Listen address override (defaults to IPFSNIFFER_HTTP_ADDR).
    #[arg(long)]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = Config::from_env().context("load config")?;
    let addr = args.addr.unwrap_or_else(|| cfg.http.addr.clone());

    // Queries go through the write alias so index rollovers are invisible.
    let search = SearchClient::new(&cfg.search.url, &cfg.search.alias).context("search client")?;

    let app = router(AppState::new(search))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::span!(
                    Level::INFO,
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    query = request.uri().query().unwrap_or("")
                )
            }),
        )
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let listener = tokio::net::TcpListener::bind(&addr).await.context("bind")?;
    tracing::info!(%addr, env = %cfg.service.env, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    tracing::info!("server shutdown");
    Ok(())
}

async fn shutdown_signal() {
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
}
