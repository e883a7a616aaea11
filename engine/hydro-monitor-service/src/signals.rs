//! Signal handling for graceful shutdown

use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::service::{ServiceState, ServiceTask};

/// Cancel `cancel` on Ctrl+C or SIGTERM. The handler tasks exit once the
/// token is cancelled for any other reason.
pub fn setup_signal_handlers(cancel: CancellationToken) -> Result<()> {
    // Handle Ctrl+C (SIGINT)
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => {
                        info!("Ctrl+C signal received");
                        cancel.cancel();
                    }
                    Err(e) => error!("Failed to listen for Ctrl+C signal: {}", e),
                },
            }
        });
    }

    // Handle SIGTERM (Unix only)
    #[cfg(unix)]
    {
        use signal_hook::consts::SIGTERM;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let shutdown_flag = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGTERM, shutdown_flag.clone())?;

        tokio::spawn(async move {
            let mut poll = tokio::time::interval(Duration::from_millis(100));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = poll.tick() => {
                        if shutdown_flag.load(Ordering::Relaxed) {
                            info!("SIGTERM signal received");
                            cancel.cancel();
                            break;
                        }
                    }
                }
            }
        });
    }

    Ok(())
}

/// Stop every task, waiting up to the configured timeout for each. Tasks
/// still running after that are aborted.
pub async fn graceful_shutdown(service_state: &ServiceState, tasks: Vec<ServiceTask>) -> Result<()> {
    info!("Starting graceful shutdown...");
    service_state.shutdown();

    let shutdown_timeout = service_state.shutdown_timeout();
    let waits = tasks.into_iter().map(|task| async move {
        let ServiceTask { name, mut handle } = task;
        match timeout(shutdown_timeout, &mut handle).await {
            Ok(Ok(())) => {
                info!("{} stopped gracefully", name);
                true
            }
            Ok(Err(e)) => {
                error!("{} task failed: {}", name, e);
                false
            }
            Err(_) => {
                warn!("{} did not stop within {:?}, aborting", name, shutdown_timeout);
                handle.abort();
                false
            }
        }
    });
    let stopped = join_all(waits).await;
    let failed = stopped.iter().filter(|ok| !**ok).count();

    for (kind, stats) in service_state.adapter_stats() {
        info!(
            "{} adapter: {} ticks, {} matches, {} misses, {} reconnects",
            kind,
            stats.ticks_seen,
            stats.matches,
            stats.misses,
            stats.reconnects
        );
    }
    let publisher = service_state.publisher().stats();
    info!(
        "Publisher: {} updates, {} notifications, {} subscriptions opened",
        publisher.updates_applied,
        publisher.notifications_delivered,
        publisher.subscriptions_opened
    );
    let clock = service_state.clock_metrics();
    info!("SimulationClock: {} ticks emitted", clock.current_tick);

    if failed > 0 {
        warn!("Graceful shutdown complete, {} task(s) did not stop cleanly", failed);
    } else {
        info!("Graceful shutdown complete");
    }
    Ok(())
}
