//! Reverse proxy binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                   ORIGIN DISPATCH                     │
//!                     │                                                       │
//!   Client Request    │  ┌─────────┐    ┌─────────┐    ┌─────────────────┐   │
//!   ──────────────────┼─▶│  http   │───▶│ routing │───▶│ backend service │   │
//!                     │  │ server  │    │ prefix  │    │     client      │   │
//!                     │  └─────────┘    └─────────┘    └───────┬─────────┘   │
//!                     │                                        │             │
//!                     │                 ┌──────────────┐       ▼             │
//!                     │                 │  inventory   │──▶ load_balancer    │
//!                     │                 │ + health     │    + retries        │
//!                     │                 └──────────────┘       │             │
//!                     │                                        ▼             │
//!   Client Response   │  ┌─────────┐    ┌─────────┐    ┌─────────────────┐   │
//!   ◀─────────────────┼──│ stream  │◀───│transport│◀───│ connection pool │◀──┼── Origin
//!                     │  └─────────┘    └─────────┘    └─────────────────┘   │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use origin_dispatch::config::{load_config, ConfigWatcher};
use origin_dispatch::http::HttpServer;
use origin_dispatch::inventory::OriginCommandBus;
use origin_dispatch::lifecycle::{build_services, shutdown_signal, Shutdown};
use origin_dispatch::observability::{logging, metrics, MetricsSink, NoopMetrics, RecorderMetrics};

#[derive(Parser)]
#[command(name = "origin-dispatch")]
#[command(about = "Reverse proxy dispatching requests to application origins", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "proxy.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    if cli.check {
        println!("{}: {} backend services OK", cli.config.display(), config.backend_services.len());
        return Ok(());
    }

    logging::init_logging(&config.observability.log_level);
    tracing::info!(config = %cli.config.display(), "origin-dispatch v0.1.0 starting");

    let sink: Arc<dyn MetricsSink> = if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                metrics::init_metrics(addr);
                Arc::new(RecorderMetrics)
            }
            Err(_) => {
                tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    "Failed to parse metrics address"
                );
                Arc::new(NoopMetrics)
            }
        }
    } else {
        Arc::new(NoopMetrics)
    };

    let shutdown = Arc::new(Shutdown::new());
    let bus = OriginCommandBus::new();
    spawn_snapshot_logger(&bus, &shutdown);

    let services = Arc::new(build_services(&config, sink, shutdown.clone(), bus)?);

    let (watcher, mut updates) = ConfigWatcher::new(&cli.config);
    let _watcher = match watcher.run() {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, origins will not be reconciled");
            None
        }
    };
    {
        let services = services.clone();
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(config) = updates.recv() => services.reconcile(&config),
                    _ = stop.recv() => break,
                    else => break,
                }
            }
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(services.routes());
    let trigger = shutdown.clone();
    server
        .run(listener, async move {
            shutdown_signal().await;
            trigger.trigger();
        })
        .await?;

    services.close();
    tracing::info!("Shutdown complete");
    Ok(())
}

fn spawn_snapshot_logger(bus: &OriginCommandBus, shutdown: &Shutdown) {
    let mut snapshots = bus.subscribe_snapshots();
    let mut stop = shutdown.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                snapshot = snapshots.recv() => match snapshot {
                    Ok(snapshot) => match serde_json::to_string(&snapshot) {
                        Ok(json) => tracing::debug!(app_id = %snapshot.app_id, snapshot = %json, "Origins inventory changed"),
                        Err(e) => tracing::warn!(error = %e, "Failed to serialize inventory snapshot"),
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Inventory snapshot logger lagging");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                _ = stop.recv() => break,
            }
        }
    });
}
