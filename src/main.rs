use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use wavespeed_relay::airtable::AirtableClient;
use wavespeed_relay::config::{self, Config};
use wavespeed_relay::relay::Relay;
use wavespeed_relay::server::{self, AppState};
use wavespeed_relay::wavespeed::WavespeedClient;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Env file to load before reading the environment (default: ./.env if present)
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Listening port; overrides PORT
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    config::load_env_file(args.env_file.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wavespeed_relay=info,tower_http=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    let mut cfg = Config::from_env()?;
    if let Some(port) = args.port {
        cfg.port = port;
    }
    for name in cfg.missing_required() {
        warn!(name, "required configuration value is not set; dependent requests will fail");
    }
    info!(config = ?cfg, callback_url = %cfg.callback_url(), "loaded configuration");

    let store = AirtableClient::from_config(&cfg).context("failed to build Airtable client")?;
    let provider =
        WavespeedClient::from_config(&cfg).context("failed to build Wavespeed client")?;
    let relay = Relay::from_config(&cfg, Arc::new(store), Arc::new(provider));
    let app = server::router(AppState {
        relay: Arc::new(relay),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "starting relay");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("relay stopped");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(?err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
