//! Scoped application server.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                  SCOPED SERVER                        │
//!                    │                                                       │
//!  Client Request    │  ┌─────────┐   ┌────────────┐   ┌──────────────────┐ │
//!  ──────────────────┼─▶│  axum   │──▶│ dispatcher │──▶│ middleware chain │ │
//!                    │  │transport│   │  + scope   │   │ access log, cors,│ │
//!                    │  └─────────┘   └─────┬──────┘   │ upgrade, static, │ │
//!                    │       ▲              │          │ api, user stages │ │
//!  Client Response   │       │              ▼          └────────┬─────────┘ │
//!  ◀─────────────────┼───────┴──────── Outgoing ◀───────────────┘           │
//!                    │                                                       │
//!                    │  ┌────────────────────────────────────────────────┐  │
//!                    │  │ container (root → request scopes), config,      │  │
//!                    │  │ observability, lifecycle, activity tracking     │  │
//!                    │  └────────────────────────────────────────────────┘  │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use scoped_server::config::{load_config, ServerConfig};
use scoped_server::http::HttpServer;
use scoped_server::lifecycle::{spawn_signal_listener, Shutdown};
use scoped_server::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "scoped-server", version, about = "Scoped application server")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "scoped-server starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        request_timeout_secs = config.http.request_timeout_secs,
        static_files = config.static_files.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                metrics::init_metrics(addr);
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::builder(config).build()?;

    let shutdown = Shutdown::new();
    spawn_signal_listener(&shutdown);
    let mut signal = shutdown.subscribe();
    server
        .run(listener, async move {
            let _ = signal.recv().await;
        })
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
