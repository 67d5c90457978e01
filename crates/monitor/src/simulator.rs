//! Simulation tick loop.
//!
//! Advances the registry's tick counter on a fixed interval, applying the
//! next simulated sample to every simulated entity in one batch. Runs until
//! the [`CancellationToken`] is triggered. Nothing on this path can fail
//! except the registry being closed.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::MIN_INTERVAL;
use crate::events::MonitorEvent;
use crate::registry::Registry;

/// Run the simulation loop. The first tick happens one interval after start.
pub async fn run(
    registry: &RwLock<Registry>,
    events: &broadcast::Sender<MonitorEvent>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let interval = interval.max(MIN_INTERVAL);
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        interval_ms = interval.as_millis() as u64,
        "Simulation loop started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Simulation loop stopping");
                break;
            }
            _ = ticker.tick() => {
                step(registry, events).await;
            }
        }
    }
}

/// Apply one simulation tick. Returns `(tick, updated)`, or `None` once the
/// registry is closed.
pub async fn step(
    registry: &RwLock<Registry>,
    events: &broadcast::Sender<MonitorEvent>,
) -> Option<(u64, usize)> {
    let result = registry.write().await.advance_simulation(Utc::now());

    match result {
        Ok((tick, updated)) => {
            tracing::debug!(tick, updated, "Simulation tick applied");
            let _ = events.send(MonitorEvent::SimulationTick { tick, updated });
            Some((tick, updated))
        }
        Err(e) => {
            tracing::debug!(error = %e, "Simulation tick skipped");
            None
        }
    }
}
