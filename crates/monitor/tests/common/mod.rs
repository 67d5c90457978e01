//! Shared fixtures for monitor integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use vitalwatch_core::reading::PartialReading;
use vitalwatch_core::record::{EntityRecord, TelemetrySource};
use vitalwatch_core::types::DbId;
use vitalwatch_monitor::config::MonitorConfig;
use vitalwatch_monitor::feed::{FeedError, LiveFetch, SessionListener, TelemetryFeed};
use vitalwatch_monitor::Monitor;

/// Bearer token the fixtures expect.
pub const TOKEN: &str = "test-token";

/// Organization id used by the fixtures.
pub const ORG_ID: DbId = 10;

/// In-memory feed with scripted responses and call counters.
///
/// Each live id has a queue of responses; once the queue is empty the
/// fallback for that id (or [`LiveFetch::NotFound`]) is returned forever.
#[derive(Default)]
pub struct ScriptedFeed {
    entities: Mutex<Vec<EntityRecord>>,
    load_error: Mutex<Option<FeedError>>,
    scripts: Mutex<HashMap<DbId, VecDeque<Result<LiveFetch, FeedError>>>>,
    fallbacks: Mutex<HashMap<DbId, Result<LiveFetch, FeedError>>>,
    fetch_calls: Mutex<HashMap<DbId, usize>>,
    fetch_order: Mutex<Vec<DbId>>,
    load_calls: AtomicUsize,
    fetch_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Decrements the in-flight counter even when the fetch future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedFeed {
    pub fn new(entities: Vec<EntityRecord>) -> Arc<Self> {
        let feed = Self::default();
        *feed.entities.lock().unwrap() = entities;
        Arc::new(feed)
    }

    pub fn set_entities(&self, entities: Vec<EntityRecord>) {
        *self.entities.lock().unwrap() = entities;
    }

    pub fn fail_loads_with(&self, error: Option<FeedError>) {
        *self.load_error.lock().unwrap() = error;
    }

    /// Queue one response for `id`.
    pub fn push(&self, id: DbId, response: Result<LiveFetch, FeedError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .push_back(response);
    }

    /// Response returned for `id` once its queue is drained.
    pub fn always(&self, id: DbId, response: Result<LiveFetch, FeedError>) {
        self.fallbacks.lock().unwrap().insert(id, response);
    }

    pub fn fetch_calls(&self, id: DbId) -> usize {
        self.fetch_calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn total_fetch_calls(&self) -> usize {
        self.fetch_calls.lock().unwrap().values().sum()
    }

    pub fn fetch_order(&self) -> Vec<DbId> {
        self.fetch_order.lock().unwrap().clone()
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    /// Make every live fetch take `delay` before answering.
    pub fn slow_fetches(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    /// Fetches currently awaiting their answer.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of fetches ever awaiting an answer at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetryFeed for ScriptedFeed {
    async fn load_entities(
        &self,
        _org_id: DbId,
        auth_token: &str,
    ) -> Result<Vec<EntityRecord>, FeedError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if auth_token != TOKEN {
            return Err(FeedError::Unauthorized);
        }
        if let Some(e) = self.load_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(self.entities.lock().unwrap().clone())
    }

    async fn fetch_live_reading(
        &self,
        entity_id: DbId,
        _auth_token: &str,
    ) -> Result<LiveFetch, FeedError> {
        *self
            .fetch_calls
            .lock()
            .unwrap()
            .entry(entity_id)
            .or_default() += 1;
        self.fetch_order.lock().unwrap().push(entity_id);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&entity_id)
            .and_then(VecDeque::pop_front);

        scripted.unwrap_or_else(|| {
            self.fallbacks
                .lock()
                .unwrap()
                .get(&entity_id)
                .cloned()
                .unwrap_or(Ok(LiveFetch::NotFound))
        })
    }
}

/// Session listener that counts invocations.
#[derive(Default)]
pub struct CountingListener {
    calls: AtomicUsize,
}

impl CountingListener {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SessionListener for CountingListener {
    fn on_session_invalid(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn live(id: DbId, name: &str) -> EntityRecord {
    EntityRecord::new(id, name, TelemetrySource::Live)
}

pub fn simulated(id: DbId, name: &str) -> EntityRecord {
    EntityRecord::new(id, name, TelemetrySource::Simulated)
}

pub fn reading(heart_rate: f64, temperature: f64) -> Result<LiveFetch, FeedError> {
    Ok(LiveFetch::Reading(PartialReading::vitals(heart_rate, temperature)))
}

/// Sequential polling keeps fetch order deterministic.
pub fn sequential_config() -> MonitorConfig {
    MonitorConfig {
        poll_concurrency: 1,
        ..MonitorConfig::default()
    }
}

/// A loaded monitor with no background loops running.
pub async fn loaded_monitor(
    feed: &Arc<ScriptedFeed>,
    listener: &Arc<CountingListener>,
    config: MonitorConfig,
) -> Arc<Monitor> {
    let monitor = Monitor::new(
        config,
        ORG_ID,
        TOKEN,
        Arc::clone(feed) as Arc<dyn TelemetryFeed>,
        Arc::clone(listener) as Arc<dyn SessionListener>,
    );
    monitor.load().await.expect("initial load should succeed");
    monitor
}
