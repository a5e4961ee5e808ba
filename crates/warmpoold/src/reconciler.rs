//! The reconcile loop: refresh then converge, on an interval or when
//! nudged by the API.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tracing::{debug, error, info};

use warmpool_controller::State;

/// Run one refresh + converge. Failures are logged; the next cycle
/// retries from a fresh refresh.
pub async fn reconcile_once(state: &State) -> bool {
    if let Err(e) = state.refresh().await {
        error!(error = %e, "refresh failed");
        return false;
    }
    match state.converge().await {
        Ok(report) if report.is_idle() => {
            debug!("pools at desired size");
            true
        }
        Ok(report) => {
            info!(created = report.created, deleted = report.deleted, "pools converged");
            true
        }
        Err(e) => {
            error!(error = %e, "converge failed");
            false
        }
    }
}

pub async fn run(
    state: Arc<State>,
    interval: Duration,
    nudge: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_ms = interval.as_millis() as u64, "reconcile loop started");

    loop {
        reconcile_once(&state).await;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = nudge.notified() => debug!("reconcile requested"),
            _ = shutdown.changed() => {
                info!("reconcile loop shutting down");
                break;
            }
        }
    }
}
