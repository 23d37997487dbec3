//! iotad - KNoT thing gateway daemon
//!
//! Usage:
//!   iotad [config.toml]
//!
//! Serves WebSocket sessions, the mini HTTP liveness server and the
//! northbound command listener. Without a config file, built-in defaults
//! are used and the entity store lives in memory only.

mod config;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use iota_api::{create_liveness_router, create_northbound_router, create_router, AppState};
use iota_broker::HttpContextBroker;
use iota_core::{EntityStore, MemoryStore};
use iota_gateway::Gateway;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{DaemonConfig, LogFormat};

/// Parsed command-line arguments
struct Args {
    /// Daemon config file (TOML)
    config_path: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut result = Args { config_path: None };

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            a if !a.starts_with('-') => result.config_path = Some(PathBuf::from(a)),
            _ => eprintln!("Unknown argument: {}", arg),
        }
    }

    result
}

fn print_help() {
    eprintln!(
        r#"iotad - KNoT thing gateway daemon

Usage: iotad [config.toml]

Options:
  -h, --help    Print this help message

Environment:
  RUST_LOG      Log filter (default: iotad=info,iota_gateway=info,iota_api=info,iota_broker=info)
"#
    );
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "iotad=info,iota_gateway=info,iota_api=info,iota_broker=info,tower_http=info".into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();

    let mut config = match &args.config_path {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };

    init_tracing(config.logging.format);
    tracing::info!("Starting iotad (KNoT thing gateway)");
    match &args.config_path {
        Some(path) => tracing::info!("Loaded config from: {}", path.display()),
        None => tracing::info!("No config file provided, using defaults"),
    }

    if config.gateway.ensure_default_group() {
        tracing::info!(
            service = %config.gateway.service,
            broker = %config.gateway.broker_url(),
            "Provisioned default service group"
        );
    }

    let store: Arc<dyn EntityStore> = match &config.store.snapshot {
        Some(path) => Arc::new(
            MemoryStore::with_snapshot(path)
                .with_context(|| format!("Failed to open store snapshot {}", path.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };
    let broker = Arc::new(HttpContextBroker::new(&config.gateway.broker_url())?);

    let server = config.server;
    let gateway = Gateway::new(config.gateway, store, broker)?;
    let state = AppState::new(gateway);

    let ws_listener = tokio::net::TcpListener::bind(server.ws_addr()).await?;
    let mini_listener = tokio::net::TcpListener::bind(server.mini_http_addr()).await?;
    let north_listener = tokio::net::TcpListener::bind(server.northbound_addr()).await?;
    tracing::info!("Session listener on ws://{}/ws", server.ws_addr());
    tracing::info!("Mini HTTP server on http://{}", server.mini_http_addr());
    tracing::info!("Northbound listener on http://{}", server.northbound_addr());

    let sessions = axum::serve(
        ws_listener,
        create_router(state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());
    let mini = axum::serve(mini_listener, create_liveness_router()).with_graceful_shutdown(shutdown_signal());
    let northbound =
        axum::serve(north_listener, create_northbound_router(state)).with_graceful_shutdown(shutdown_signal());

    tokio::try_join!(sessions.into_future(), mini.into_future(), northbound.into_future())?;

    tracing::info!("iotad stopped");
    Ok(())
}
