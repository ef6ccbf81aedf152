//! compute-coordinator: dispatch & aggregation engine for the compute grid.
//!
//! Subscribes to events:
//! - `compute:capabilities:v1:update`: keeps the worker registry current
//! - `compute:dispatch:v1:requested`: validates, matches and assigns
//! - `compute:dispatch:v1:success`: fans chunk results back in
//! - `compute:task:v1:requested`: splits whole tasks into chunks
//!
//! Publishes events:
//! - `compute:dispatch:v1:{accepted,assigned,failed}`
//! - `compute:dispatch:v1:requested`: one per scheduled chunk
//! - `compute:task:v1:success`: once every chunk of a task completed

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use nexgrid_bus::{shutdown_signal, CancellationToken, EventBus, ZmqBus};
use nexgrid_dispatch::{GridConfig, GridRuntime, InMemoryTaskStore};

// ── CLI ─────────────────────────────────────────────────────────────

/// Compute grid coordinator: capability registry, matching, fan-out and fan-in.
#[derive(Parser, Debug)]
#[command(name = "compute-coordinator", version, about)]
struct Cli {
    /// Path to nexgrid.toml config file.
    #[arg(long, env = "NEXGRID_CONFIG", default_value = "config/nexgrid.toml")]
    config: String,

    /// Shutdown timeout in seconds (overrides `runtime.shutdown_timeout_secs`).
    #[arg(long, env = "NEXGRID_SHUTDOWN_TIMEOUT")]
    shutdown_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Fall back to local defaults if the file is missing or invalid.
    let mut config = match GridConfig::from_file(&cli.config) {
        Ok(cfg) => {
            info!(path = %cli.config, "loaded grid config");
            cfg
        }
        Err(e) => {
            warn!(
                error = %e,
                path = %cli.config,
                "failed to load config, using local defaults"
            );
            let mut cfg = GridConfig::default();
            cfg.apply_overrides(|key| std::env::var(key).ok());
            cfg.validate()?;
            cfg
        }
    };
    if let Some(secs) = cli.shutdown_timeout {
        config.runtime.shutdown_timeout_secs = secs;
    }

    let frontend = config.bus.frontend_transport()?;
    let backend = config.bus.backend_transport()?;
    frontend.ensure_ipc_dir()?;
    backend.ensure_ipc_dir()?;

    let bus = ZmqBus::connect(&frontend, &backend).await?;
    info!(frontend = %frontend, backend = %backend, "connected to bus");

    let runtime = GridRuntime::new(config, bus.publisher(), Arc::new(InMemoryTaskStore::new()));
    let cancel = CancellationToken::new();
    let running = runtime.start(&bus, cancel.clone()).await?;

    shutdown_signal().await;
    info!("shutdown signal received, draining");
    cancel.cancel();

    for report in running.join().await {
        if report.detached > 0 {
            warn!(loop_name = %report.name, detached = report.detached, "handlers still running at exit");
        }
        info!(loop_name = %report.name, received = report.received, "loop finished");
    }

    Ok(())
}
