//! warmpoold: the warmpool daemon.
//!
//! Loads `warmpool.toml`, registers the configured runtimes, and keeps
//! each runtime's free pool at its declared size.
//!
//! # Usage
//!
//! ```text
//! warmpoold --config warmpool.toml serve --port 5020
//! warmpoold --config warmpool.toml status
//! warmpoold --config warmpool.toml reconcile
//! warmpoold --config warmpool.toml delete-all
//! ```

mod reconciler;
mod setup;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{Notify, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use warmpool_core::config::parse_period;

const DEFAULT_FILTER: &str = "info,warmpool=debug,warmpoold=debug";

#[derive(Parser)]
#[command(name = "warmpoold", about = "warmpool daemon", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, short, global = true, default_value = "warmpool.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconcile loop and the control API until Ctrl-C.
    Serve {
        /// Port for the control API. Overrides `api.port`.
        #[arg(long)]
        port: Option<u16>,

        /// Time between reconcile cycles, e.g. "30s". Overrides
        /// `controller.interval`.
        #[arg(long)]
        interval: Option<String>,
    },
    /// Refresh once and print every runtime's pools.
    Status,
    /// Run a single refresh + converge cycle.
    Reconcile,
    /// Delete every service owned by a configured runtime.
    DeleteAll,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = setup::load_config(&cli.config)?;
    let provider = setup::build_provider(&config.provider)?;
    let state = setup::build_state(&config, provider)?;

    match cli.command {
        Command::Serve { port, interval } => {
            let port = port.unwrap_or(config.api.port);
            let interval = match interval {
                Some(interval) => parse_period(&interval)?,
                None => config.interval()?,
            };
            serve(state, port, interval).await
        }
        Command::Status => {
            state.refresh().await?;
            for name in state.runtime_names() {
                for line in state.display(&name)? {
                    println!("{line}");
                }
            }
            Ok(())
        }
        Command::Reconcile => {
            let report = state.reconcile().await?;
            println!("created {}, deleted {}", report.created, report.deleted);
            Ok(())
        }
        Command::DeleteAll => {
            let deleted = state.delete_all().await?;
            println!("deleted {deleted} services");
            Ok(())
        }
    }
}

async fn serve(
    state: Arc<warmpool_controller::State>,
    port: u16,
    interval: std::time::Duration,
) -> anyhow::Result<()> {
    info!(runtimes = state.runtime_names().len(), "warmpool daemon starting");

    let nudge = Arc::new(Notify::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconcile_handle = tokio::spawn(reconciler::run(
        Arc::clone(&state),
        interval,
        Arc::clone(&nudge),
        shutdown_rx,
    ));

    let router = warmpool_api::build_router(state, nudge);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Err(e) = reconcile_handle.await {
        error!(error = %e, "reconcile loop panicked");
    }
    info!("warmpool daemon stopped");
    Ok(())
}
