//! Edge media proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ route store (L1 → L2 → L3) ──▶ upstream selection
//!                          │
//!                          ├── /manage/api ──▶ admin (publish / rollback / export)
//!                          │
//!                          ├── video / ranged ──▶ media engine (TTFB, retries, supervised stream)
//!                          ├── upgrade ─────────▶ websocket tunnel
//!                          └── other ───────────▶ single bounded fetch
//!                                                     │
//!     Client Response                                 ▼
//!     ◀────────────── header normalizer ◀──────── upstream response
//! ```

use arc_swap::ArcSwap;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use edge_media_proxy::config::loader::load_config;
use edge_media_proxy::config::watcher::{apply_updates, ConfigWatcher};
use edge_media_proxy::config::ProxyConfig;
use edge_media_proxy::lifecycle::{signals, startup, Shutdown};
use edge_media_proxy::observability::logging;
use edge_media_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "edge-media-proxy", version, about = "Subdomain-routed edge proxy for media servers")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-media-proxy starting");
    if args.config.is_none() {
        tracing::warn!("No --config given; running with defaults");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        default_upstream = %config.upstream.default_url,
        store_backend = ?config.route_store.backend,
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    startup::start_metrics(&config)?;

    let bind_address = config.listener.bind_address.clone();
    let live = Arc::new(ArcSwap::from_pointee(config));
    let state = startup::build_state(live.clone()).await?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    // Held for the lifetime of the process; dropping it stops the watch.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            tokio::spawn(apply_updates(live.clone(), updates, shutdown.subscribe()));
            Some(watcher.run()?)
        }
        None => None,
    };

    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(state);
    server.run(listener, shutdown.wait()).await?;

    shutdown.trigger();
    tracing::info!("Shutdown complete");
    Ok(())
}
