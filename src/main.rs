//! Embedding proxy server.
//!
//! # Architecture Overview
//!
//! ```text
//!   Dashboard iframe          ┌──────────────────────────────────────────────┐
//!   GET /proxy?url=...        │                 EMBED PROXY                  │
//!   ──────────────────────────┼─▶ http ──▶ validator ──▶ fetcher ──────────────┼──▶ Upstream
//!                             │                              │               │     page
//!                             │                              ▼               │
//!   ◀─────────────────────────┼── response ◀── headers ◀── rewriter          │
//!                             │                                              │
//!                             │  config (toml + watcher) · observability     │
//!                             │  lifecycle (signals, shutdown) · net (tls)   │
//!                             └──────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use embed_proxy::config::{self, watcher::ConfigWatcher, ProxyConfig};
use embed_proxy::lifecycle::{wait_for_signal, Shutdown};
use embed_proxy::observability::{logging, metrics};
use embed_proxy::{net, HttpServer};

#[derive(Parser)]
#[command(name = "embed-proxy", version)]
#[command(about = "Proxy that makes third-party pages embeddable in an iframe", long_about = None)]
struct Args {
    /// TOML config file, watched for changes
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "embed-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        timeout_secs = config.upstream.timeout_secs,
        max_redirects = config.upstream.max_redirects,
        rewrite = config.rewrite.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    // Keep the watcher alive for the life of the process.
    let (config_updates, _watcher) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (updates, Some(watcher.run()?))
        }
        None => (tokio::sync::mpsc::unbounded_channel().1, None),
    };

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let tls = config.listener.tls.clone();
    let bind_address = config.listener.bind_address.clone();
    let server = HttpServer::new(config)?;

    let serve = async {
        match tls {
            Some(tls) => {
                let rustls = net::load_tls_config(&tls).await?;
                let addr: SocketAddr = bind_address.parse()?;
                server.run_tls(addr, rustls, config_updates, server_shutdown).await?;
            }
            None => {
                let listener = TcpListener::bind(&bind_address).await?;
                tracing::info!(address = %listener.local_addr()?, "Listening for connections");
                server.run(listener, config_updates, server_shutdown).await?;
            }
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    };
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => result?,
        _ = wait_for_signal() => {
            shutdown.trigger();
            serve.await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
