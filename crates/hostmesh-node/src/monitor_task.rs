//! Heartbeat monitor -- demotes hosts that stopped heartbeating.
//!
//! Every tick, any online host silent for longer than the host timeout is
//! marked offline. Records are never removed; a later heartbeat or
//! registration brings the host back.

use std::time::Duration;

use chrono::Utc;
use hostmesh_registry::HostRegistry;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Run the monitor loop until shutdown.
pub async fn run_monitor_loop(
    registry: HostRegistry,
    interval: Duration,
    host_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep(&registry, host_timeout);
            }
            _ = shutdown.recv() => {
                tracing::info!("monitor: shutting down");
                return;
            }
        }
    }
}

/// One monitor pass. Returns how many hosts were demoted.
pub fn sweep(registry: &HostRegistry, host_timeout: Duration) -> usize {
    let demoted = registry.mark_stale(Utc::now(), host_timeout);
    for host in &demoted {
        tracing::warn!(
            host = %host.name,
            silent_secs = host.silent_for_secs,
            "monitor: host marked offline (no heartbeat)"
        );
    }
    demoted.len()
}
