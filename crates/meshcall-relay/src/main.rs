//! meshcall-relay: WebSocket signaling store for meshcall clients.
//!
//! Hosts one in-memory store and serves it over JSON frames. Clients
//! publish negotiation messages, subscribe to each other's paths and keep
//! call rosters up to date with compare-and-set. The relay never looks
//! inside the values it stores.

mod connection;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use meshcall_common::ConfigError;
use meshcall_config::MeshcallConfig;
use meshcall_session::MemoryStore;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use crate::connection::handle_connection;

#[derive(Parser)]
#[command(name = "meshcall-relay", about = "WebSocket signaling relay for meshcall")]
struct Args {
    /// Port to listen on (overrides `relay.port`).
    #[arg(short, long)]
    port: Option<u16>,

    /// Drop paths idle for this many seconds (overrides `relay.idle_ttl_secs`).
    #[arg(long)]
    idle_ttl: Option<u64>,

    /// Config file; defaults to the platform config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Load the config file and apply command-line overrides. A config that
/// fails to load is reported back so it can be logged once tracing is up.
fn load_settings(args: &Args) -> (MeshcallConfig, Option<ConfigError>) {
    let loaded = match &args.config {
        Some(path) => meshcall_config::load_config_from(path),
        None => meshcall_config::load_config(),
    };
    let (mut config, err) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (MeshcallConfig::default(), Some(e)),
    };
    if let Some(port) = args.port {
        config.relay.port = port;
    }
    if let Some(ttl) = args.idle_ttl {
        config.relay.idle_ttl_secs = ttl;
    }
    (config, err)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let (config, load_error) = load_settings(&args);

    let default_filter = format!(
        "meshcall_relay={level},meshcall_session={level}",
        level = config.logging.level.as_directive()
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    if let Some(e) = load_error {
        tracing::warn!(error = %e, "Config not loaded, using defaults");
    }

    let config = config.relay;
    let store = MemoryStore::new();

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind TCP listener");
            std::process::exit(1);
        }
    };

    tracing::info!("meshcall-relay listening on {}", addr);

    // Idle path reaper.
    let reaper_store = store.clone();
    let ttl = Duration::from_secs(config.idle_ttl_secs);
    let every = Duration::from_secs(config.reap_interval_secs.max(1));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(every).await;
            let pruned = reaper_store.prune_idle(ttl);
            let count = reaper_store.path_count();
            tracing::debug!(paths = count, pruned, "Reaper tick");
        }
    });

    // Accept loop.
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let store = store.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => handle_connection(ws, addr, store).await,
                        Err(e) => {
                            tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[relay]\nport = 9000\nidle_ttl_secs = 120\n").unwrap();

        let args = Args::parse_from([
            "meshcall-relay",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9100",
        ]);
        let (config, err) = load_settings(&args);
        assert!(err.is_none());
        assert_eq!(config.relay.port, 9100);
        assert_eq!(config.relay.idle_ttl_secs, 120);
    }

    #[test]
    fn unreadable_config_falls_back_to_defaults() {
        let args = Args::parse_from([
            "meshcall-relay",
            "--config",
            "/nonexistent/meshcall/config.toml",
        ]);
        let (config, err) = load_settings(&args);
        assert!(err.is_some());
        assert_eq!(config.relay.port, 8787);
    }
}
