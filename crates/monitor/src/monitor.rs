//! The [`Monitor`] facade.
//!
//! Owns the registry, the backoff tracker and the two background loops
//! (simulation ticks and live polling), and exposes the operations a
//! display layer needs: the projected view, selection, search, sort,
//! manual refresh and a loading flag.
//!
//! Lock order is registry, then backoff. The view state lock is never held
//! together with either.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vitalwatch_core::backoff::{BackoffState, BackoffTracker};
use vitalwatch_core::record::EntityRecord;
use vitalwatch_core::types::DbId;
use vitalwatch_core::view::{project, sync_selection, SortCriterion};

use crate::config::MonitorConfig;
use crate::events::{MonitorEvent, EVENT_CHANNEL_CAPACITY};
use crate::feed::{FeedError, SessionListener, TelemetryFeed};
use crate::poller::{CycleOutcome, TelemetryPoller};
use crate::registry::{Registry, RegistryError};
use crate::simulator;

/// How long [`Monitor::shutdown`] waits for each background task.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced to the caller. Per-entity fetch failures never appear
/// here; they are absorbed by the backoff tracker.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The backend rejected the auth token. The session listener has
    /// already been notified.
    #[error("Session is no longer valid")]
    SessionInvalid,

    /// Loading the entity list failed for a reason other than auth.
    #[error("Failed to load entities: {0}")]
    Load(FeedError),

    /// The loaded entities could not be seeded.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Display-side state: search term, sort criterion and selection.
#[derive(Debug, Default)]
struct ViewState {
    search: String,
    sort: SortCriterion,
    selected: Option<DbId>,
}

/// Marks a load in progress for as long as it is alive.
struct LoadingGuard<'a>(&'a AtomicUsize);

impl<'a> LoadingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Monitor {
    config: MonitorConfig,
    org_id: DbId,
    auth_token: String,
    feed: Arc<dyn TelemetryFeed>,
    session: Arc<dyn SessionListener>,
    registry: Arc<RwLock<Registry>>,
    backoff: Arc<Mutex<BackoffTracker>>,
    poller: Arc<TelemetryPoller>,
    view: Mutex<ViewState>,
    loading: AtomicUsize,
    event_tx: broadcast::Sender<MonitorEvent>,
    /// Master cancellation token, cancelled during shutdown.
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Monitor {
    /// Build a monitor without loading anything or starting the loops.
    pub fn new(
        config: MonitorConfig,
        org_id: DbId,
        auth_token: impl Into<String>,
        feed: Arc<dyn TelemetryFeed>,
        session: Arc<dyn SessionListener>,
    ) -> Arc<Self> {
        let auth_token = auth_token.into();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let registry = Arc::new(RwLock::new(Registry::new(config.history_limit)));
        let backoff = Arc::new(Mutex::new(BackoffTracker::new(config.backoff.clone())));

        let poller = Arc::new(TelemetryPoller::new(
            Arc::clone(&feed),
            Arc::clone(&session),
            Arc::clone(&registry),
            Arc::clone(&backoff),
            event_tx.clone(),
            auth_token.clone(),
            config.poll_concurrency,
            config.poll_interval,
        ));

        Arc::new(Self {
            config,
            org_id,
            auth_token,
            feed,
            session,
            registry,
            backoff,
            poller,
            view: Mutex::new(ViewState::default()),
            loading: AtomicUsize::new(0),
            event_tx,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Build a monitor, load the initial snapshot and start both loops.
    pub async fn start(
        config: MonitorConfig,
        org_id: DbId,
        auth_token: impl Into<String>,
        feed: Arc<dyn TelemetryFeed>,
        session: Arc<dyn SessionListener>,
    ) -> Result<Arc<Self>, MonitorError> {
        let monitor = Self::new(config, org_id, auth_token, feed, session);
        monitor.load().await?;
        monitor.spawn_loops().await;
        Ok(monitor)
    }

    /// Spawn the simulation and poll loops. Does nothing if they are
    /// already running or the monitor was shut down.
    pub async fn spawn_loops(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() || self.cancel.is_cancelled() {
            return;
        }

        let poller = Arc::clone(&self.poller);
        let cancel = self.cancel.child_token();
        tasks.push(tokio::spawn(async move {
            poller.run(cancel).await;
        }));

        let registry = Arc::clone(&self.registry);
        let event_tx = self.event_tx.clone();
        let interval = self.config.sim_interval;
        let cancel = self.cancel.child_token();
        tasks.push(tokio::spawn(async move {
            simulator::run(&registry, &event_tx, interval, cancel).await;
        }));
    }

    /// Load the organization's entities and reseed the registry.
    ///
    /// Reseeding resets every entity's backoff and the simulation tick.
    /// On failure the current registry is kept.
    pub async fn load(&self) -> Result<usize, MonitorError> {
        let _loading = LoadingGuard::new(&self.loading);

        let records = match self
            .feed
            .load_entities(self.org_id, &self.auth_token)
            .await
        {
            Ok(records) => records,
            Err(FeedError::Unauthorized) => {
                tracing::error!(org_id = self.org_id, "Entity load rejected: session invalid");
                self.session.on_session_invalid();
                let _ = self.event_tx.send(MonitorEvent::SessionInvalidated);
                return Err(MonitorError::SessionInvalid);
            }
            Err(e) => {
                tracing::error!(org_id = self.org_id, error = %e, "Failed to load entities");
                return Err(MonitorError::Load(e));
            }
        };

        let count = records.len();
        let generation = {
            let mut registry = self.registry.write().await;
            let generation = registry.seed(records)?;
            self.backoff.lock().await.reset_all();
            generation
        };

        tracing::info!(org_id = self.org_id, count, generation, "Registry seeded");
        let _ = self
            .event_tx
            .send(MonitorEvent::Seeded { count, generation });
        Ok(count)
    }

    /// Manual refresh: reset every entity's backoff, then reload.
    pub async fn refresh(&self) -> Result<usize, MonitorError> {
        tracing::info!(org_id = self.org_id, "Manual refresh requested");
        self.backoff.lock().await.reset_all();
        self.load().await
    }

    /// Run one poll cycle now, outside the timer.
    pub async fn poll_now(&self) -> CycleOutcome {
        self.poller.run_cycle().await
    }

    /// Apply one simulation tick now, outside the timer.
    pub async fn tick_simulation(&self) -> Option<(u64, usize)> {
        simulator::step(&self.registry, &self.event_tx).await
    }

    /// Filtered and sorted records for display.
    ///
    /// Also reconciles the selection: if the selected entity is no longer
    /// visible, the first visible one is selected instead.
    pub async fn projected_view(&self) -> Vec<EntityRecord> {
        let snapshot = self.registry.read().await.snapshot();
        let mut state = self.view.lock().await;
        let view = project(&snapshot, &state.search, state.sort);
        state.selected = sync_selection(state.selected, &view);
        view
    }

    /// Selected entity after reconciling with the current view.
    pub async fn selection(&self) -> Option<DbId> {
        self.projected_view().await;
        self.view.lock().await.selected
    }

    pub async fn set_selection(&self, id: DbId) {
        self.view.lock().await.selected = Some(id);
    }

    pub async fn set_search_term(&self, term: impl Into<String>) {
        self.view.lock().await.search = term.into();
    }

    pub async fn set_sort_criterion(&self, sort: SortCriterion) {
        self.view.lock().await.sort = sort;
    }

    /// `true` while an initial load or refresh is in progress.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst) > 0
    }

    /// Owned copy of every record, in load order.
    pub async fn snapshot(&self) -> Vec<EntityRecord> {
        self.registry.read().await.snapshot()
    }

    /// Current simulation tick.
    pub async fn tick(&self) -> u64 {
        self.registry.read().await.tick()
    }

    /// Backoff state for one entity, e.g. to flag stale readings.
    pub async fn backoff_status(&self, id: DbId) -> BackoffState {
        self.backoff.lock().await.state(id)
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.event_tx.subscribe()
    }

    /// Stop both loops and freeze the registry.
    ///
    /// In-flight fetches are dropped and nothing is merged afterwards.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down monitor");
        self.cancel.cancel();
        self.registry.write().await.close();

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, handle)
                .await
                .is_err()
            {
                tracing::warn!("Background task did not stop in time");
            }
        }

        tracing::info!("Monitor shut down complete");
    }
}
