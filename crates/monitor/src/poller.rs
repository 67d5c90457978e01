//! Live telemetry poll loop.
//!
//! One timer drives every live entity. Each cycle:
//!
//! 1. Skip entities the [`BackoffTracker`] says are suspended.
//! 2. Fetch the rest, at most `concurrency` at a time.
//! 3. Apply each outcome as it completes: readings are merged and reset the
//!    entity's backoff; "no data", transport and malformed responses count
//!    as failures; an auth rejection notifies the [`SessionListener`] and
//!    abandons the rest of the cycle.
//!
//! Outcomes from a cycle that started before the latest seed are discarded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use vitalwatch_core::backoff::{BackoffTracker, FailureOutcome};
use vitalwatch_core::reading::PartialReading;
use vitalwatch_core::record::TelemetrySource;
use vitalwatch_core::types::DbId;

use crate::config::MIN_INTERVAL;
use crate::events::MonitorEvent;
use crate::feed::{FeedError, LiveFetch, SessionListener, TelemetryFeed};
use crate::registry::{Registry, RegistryError};

/// Per-cycle counters, logged at debug level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Fetches issued.
    pub attempted: usize,
    /// Entities skipped because they are backing off.
    pub skipped: usize,
    /// Readings merged into the registry.
    pub merged: usize,
    /// Fetches counted as failures.
    pub failed: usize,
    /// Outcomes dropped because the registry was reseeded or closed meanwhile.
    pub discarded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// The session was rejected; remaining outcomes were not applied.
    SessionInvalid,
}

pub struct TelemetryPoller {
    feed: Arc<dyn TelemetryFeed>,
    session: Arc<dyn SessionListener>,
    registry: Arc<RwLock<Registry>>,
    backoff: Arc<Mutex<BackoffTracker>>,
    events: broadcast::Sender<MonitorEvent>,
    auth_token: String,
    concurrency: usize,
    interval: Duration,
}

impl TelemetryPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        feed: Arc<dyn TelemetryFeed>,
        session: Arc<dyn SessionListener>,
        registry: Arc<RwLock<Registry>>,
        backoff: Arc<Mutex<BackoffTracker>>,
        events: broadcast::Sender<MonitorEvent>,
        auth_token: String,
        concurrency: usize,
        interval: Duration,
    ) -> Self {
        Self {
            feed,
            session,
            registry,
            backoff,
            events,
            auth_token,
            concurrency: concurrency.max(1),
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Poll on a fixed interval until `cancel` is triggered.
    ///
    /// The first cycle runs one interval after start. Cancellation abandons
    /// an in-flight cycle; its pending fetches are dropped unapplied.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            concurrency = self.concurrency,
            "Telemetry poller started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Abandoning in-flight poll cycle");
                    break;
                }
                outcome = self.run_cycle() => match outcome {
                    CycleOutcome::Completed(report) => {
                        tracing::debug!(
                            attempted = report.attempted,
                            skipped = report.skipped,
                            merged = report.merged,
                            failed = report.failed,
                            discarded = report.discarded,
                            "Poll cycle complete",
                        );
                    }
                    CycleOutcome::SessionInvalid => {
                        tracing::warn!("Poll cycle aborted: session invalid");
                    }
                },
            }
        }

        tracing::info!("Telemetry poller stopped");
    }

    /// Run one poll cycle over every live entity.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let (live_ids, generation) = {
            let registry = self.registry.read().await;
            if registry.is_closed() {
                return CycleOutcome::Completed(CycleReport::default());
            }
            (registry.live_ids(), registry.generation())
        };

        let total = live_ids.len();
        let eligible: Vec<DbId> = {
            let now = Instant::now();
            let mut backoff = self.backoff.lock().await;
            live_ids
                .into_iter()
                .filter(|&id| backoff.is_eligible(id, now))
                .collect()
        };

        let mut report = CycleReport {
            attempted: eligible.len(),
            skipped: total - eligible.len(),
            ..CycleReport::default()
        };

        let feed = self.feed.as_ref();
        let token = self.auth_token.as_str();
        let mut fetches = stream::iter(eligible)
            .map(move |id| async move { (id, feed.fetch_live_reading(id, token).await) })
            .buffer_unordered(self.concurrency);

        while let Some((entity_id, result)) = fetches.next().await {
            let applied = match result {
                Err(FeedError::Unauthorized) => {
                    tracing::error!(entity_id, "Telemetry feed rejected the session");
                    self.session.on_session_invalid();
                    let _ = self.events.send(MonitorEvent::SessionInvalidated);
                    return CycleOutcome::SessionInvalid;
                }
                Ok(LiveFetch::Reading(reading)) if !reading.is_empty() => {
                    let merged = self.apply_reading(entity_id, generation, &reading).await;
                    if merged {
                        report.merged += 1;
                    }
                    merged
                }
                Ok(LiveFetch::Reading(_)) | Ok(LiveFetch::NotFound) => {
                    tracing::debug!(entity_id, "No live data for entity");
                    self.apply_failure(entity_id, generation).await
                }
                Err(e) => {
                    tracing::warn!(entity_id, error = %e, "Live fetch failed");
                    self.apply_failure(entity_id, generation).await
                }
            };

            if !applied {
                report.discarded += 1;
            }
        }

        report.failed = report.attempted - report.merged - report.discarded;
        CycleOutcome::Completed(report)
    }

    /// Merge a reading and reset the entity's backoff. Returns `false` if the
    /// outcome was discarded.
    async fn apply_reading(&self, entity_id: DbId, generation: u64, reading: &PartialReading) -> bool {
        let mut registry = self.registry.write().await;
        if registry.generation() != generation {
            tracing::debug!(entity_id, "Discarding reading from a previous load");
            return false;
        }

        let risk = match registry.merge(entity_id, reading, TelemetrySource::Live, Utc::now()) {
            Ok(record) => record.risk,
            Err(RegistryError::Closed) => return false,
            Err(e) => {
                tracing::warn!(entity_id, error = %e, "Failed to merge live reading");
                return false;
            }
        };

        // Registry guard is still held so a concurrent reseed cannot
        // interleave between the merge and the backoff reset.
        self.backoff.lock().await.record_success(entity_id);
        drop(registry);

        tracing::debug!(entity_id, %risk, "Merged live reading");
        let _ = self.events.send(MonitorEvent::EntityUpdated { entity_id, risk });
        true
    }

    /// Count a failure against the entity. Returns `false` if discarded.
    async fn apply_failure(&self, entity_id: DbId, generation: u64) -> bool {
        let registry = self.registry.read().await;
        if registry.is_closed() || registry.generation() != generation {
            return false;
        }

        let outcome = self
            .backoff
            .lock()
            .await
            .record_failure(entity_id, Instant::now());
        drop(registry);

        match outcome {
            FailureOutcome::Retrying { retry_count } => {
                tracing::debug!(entity_id, retry_count, "Live fetch failure recorded");
            }
            FailureOutcome::Suspended { retry_count, delay } => {
                let delay_ms = delay.as_millis() as u64;
                tracing::warn!(entity_id, retry_count, delay_ms, "Suspending live polling for entity");
                let _ = self.events.send(MonitorEvent::EntitySuspended {
                    entity_id,
                    retry_count,
                    delay_ms,
                });
            }
            FailureOutcome::AlreadySuspended => {}
        }
        true
    }
}
