//! replay-proxy
//!
//! Transparent HTTP/HTTPS proxy that answers repeated requests from a
//! shared archive instead of the origin.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────┐
//!                      │                  REPLAY PROXY                    │
//!                      │                                                  │
//!   Redirected client  │  ┌──────────┐   ┌─────────────┐   ┌───────────┐  │
//!   ───────────────────┼─▶│   net    │──▶│    proxy    │──▶│  origin   │──┼──▶ Origin
//!                      │  │ listener │   │  pipeline   │◀──│   leg     │◀─┼─── server
//!                      │  └──────────┘   └──────┬──────┘   └───────────┘  │
//!                      │                        │                         │
//!                      │                        ▼                         │
//!                      │                 ┌─────────────┐                  │
//!                      │                 │   archive   │──▶ record_dir    │
//!                      │                 │  (shared)   │                  │
//!                      │                 └─────────────┘                  │
//!                      │                                                  │
//!                      │  config · observability · lifecycle              │
//!                      └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use replay_proxy::config::{load_or_default, validation::validate_config, ConfigError};
use replay_proxy::lifecycle::{signals, Shutdown};
use replay_proxy::net::Listener;
use replay_proxy::observability::{logging, metrics};
use replay_proxy::ProxyServer;

#[derive(Debug, Parser)]
#[command(name = "replay-proxy", version, about = "Transparent record/replay HTTP proxy")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding listener.bind_address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_or_default(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    logging::init(&config.observability.log_level);
    tracing::info!("replay-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        idle_secs = config.timeouts.idle_secs,
        tls = config.tls.is_some(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Arc::new(Shutdown::new());
    let stop = shutdown.subscribe();
    signals::spawn_signal_handler(Arc::clone(&shutdown));

    let listener = Listener::bind(&config.listener).await?;
    let server = ProxyServer::new(&config)?;
    server.run(listener, stop).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
