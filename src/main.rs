//! Presence gateway server.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────────┐
//!                         │                   PRESENCE GATEWAY                    │
//!                         │                                                       │
//!   Client request        │  ┌──────────┐   ┌──────────────┐   ┌──────────────┐  │
//!   ──────────────────────┼─▶│ identity │──▶│ threat score │──▶│  reputation  │  │
//!                         │  │ resolver │   │    engine    │   │   tracker    │  │
//!                         │  └──────────┘   └──────────────┘   └──────┬───────┘  │
//!                         │                  403 / throttle / continue │          │
//!                         │                                            ▼          │
//!   Upgrade request       │  ┌──────────────┐     ┌──────────────────────────┐   │
//!   ──────────────────────┼─▶│  gatekeeper  │────▶│ connection lifecycle mgr │   │
//!                         │  │ token + prov.│     │ dispatcher · teardown    │   │
//!                         │  └──────────────┘     └──────────────────────────┘   │
//!                         │                                                       │
//!                         │  config (hot reload) · observability · admin API      │
//!                         └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;

use presence_gateway::admin::{serve_admin, setup_admin_router};
use presence_gateway::config::watcher::{apply_updates, ConfigWatcher};
use presence_gateway::config::{load_config, GatewayConfig};
use presence_gateway::lifecycle::signals::wait_for_signal;
use presence_gateway::net::tls::load_tls_config;
use presence_gateway::observability::{logging, metrics};
use presence_gateway::{AppState, Collaborators, GatewayServer, Shutdown};

/// Time active connections get to finish teardown after the server stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(name = "presence-gateway", version, about = "Adaptive connection security gateway")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "presence-gateway starting");
    if args.config.is_none() {
        tracing::warn!("No configuration file given, running with defaults");
    }
    tracing::info!(
        bind_address = %config.listener.bind_address,
        mode = ?config.auth.mode,
        max_active = config.connections.max_active,
        max_lifetime_secs = config.connections.max_lifetime_secs,
        suspicious_threshold = config.reputation.suspicious_threshold,
        block_threshold = config.reputation.block_threshold,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let state = AppState::build(&config, Collaborators::in_memory(&config), &shutdown)?;
    let sweeper = state.reputation.start_sweeper(shutdown.subscribe());

    // Kept alive for the lifetime of the process.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            apply_updates(updates, state.reputation.clone(), shutdown.subscribe());
            match watcher.run() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload unavailable");
                    None
                }
            }
        }
        None => None,
    };

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let router = setup_admin_router(state.clone(), &config.admin.api_key);
        let admin_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_admin(listener, router, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let server = GatewayServer::new(config.clone(), state.clone());
    match &config.listener.tls {
        Some(tls) => {
            let rustls = load_tls_config(tls).await?;
            let addr: SocketAddr = config.listener.bind_address.parse()?;
            server.run_tls(addr, rustls, shutdown.clone()).await?;
        }
        None => {
            let listener = TcpListener::bind(&config.listener.bind_address).await?;
            server.run(listener, shutdown.clone()).await?;
        }
    }

    shutdown.trigger();
    if !state.tracker.wait_for_drain(DRAIN_TIMEOUT).await {
        tracing::warn!(
            remaining = state.tracker.active_count(),
            "Connections still open after drain timeout"
        );
    }
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Reputation sweeper task failed");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
