//! Per-entity backoff state for the live telemetry poller.
//!
//! Each live entity is either **active** (eligible to be fetched) or
//! **suspended** (skipped until `next_attempt_at`). After `max_retries`
//! consecutive failures the entity is suspended for an exponentially
//! growing delay:
//!
//! ```text
//! delay = min(initial_delay * 2^(suspensions - 1), max_delay)
//! ```
//!
//! where `suspensions` counts suspended cycles since the last success, so the
//! first suspension waits `initial_delay`. Once the delay elapses the entity
//! resumes with `retry_count` reset to zero. That is a resumed attempt, not a
//! success: only [`BackoffTracker::record_success`] clears the suspension
//! count. No jitter is applied.
//!
//! Time is passed in explicitly so the state machine stays pure.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::DbId;

/// Hard ceiling on any suspension, whatever the configured maximum.
pub const MAX_SUSPENSION: Duration = Duration::from_secs(24 * 60 * 60);

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Consecutive failures that trigger a suspension.
    pub max_retries: u32,
    /// Length of the first suspension.
    pub initial_delay: Duration,
    /// Upper bound on any suspension.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(2_000),
            max_delay: Duration::from_millis(60_000),
        }
    }
}

/// Delay for the `suspensions`-th consecutive suspension (1-based), clamped
/// to [`BackoffConfig::max_delay`] and [`MAX_SUSPENSION`].
pub fn suspension_delay(suspensions: u32, config: &BackoffConfig) -> Duration {
    let cap = config.max_delay.min(MAX_SUSPENSION);
    let exponent = suspensions.saturating_sub(1).min(31);
    let factor = 1u32 << exponent;
    config
        .initial_delay
        .checked_mul(factor)
        .unwrap_or(cap)
        .min(cap)
}

/// Whether an entity may be fetched right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPhase {
    Active,
    Suspended,
}

/// Backoff bookkeeping for one entity.
///
/// Invariant: `suspended` is `true` exactly when `next_attempt_at` is `Some`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    /// Consecutive failures since the last success or resumption.
    pub retry_count: u32,
    pub suspended: bool,
    /// Earliest time the entity becomes eligible again. Only set while suspended.
    pub next_attempt_at: Option<Instant>,
    /// Suspended cycles since the last success. Drives the exponent.
    pub suspensions: u32,
}

impl BackoffState {
    pub fn phase(&self) -> BackoffPhase {
        if self.suspended {
            BackoffPhase::Suspended
        } else {
            BackoffPhase::Active
        }
    }
}

/// Result of [`BackoffTracker::record_failure`], mostly for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still active; `retry_count` failures so far.
    Retrying { retry_count: u32 },
    /// This failure crossed the threshold and suspended the entity.
    Suspended { retry_count: u32, delay: Duration },
    /// The entity was already suspended; nothing changed.
    AlreadySuspended,
}

/// Owned map of backoff state keyed by entity id.
///
/// Ids without an entry are active with zero retries.
#[derive(Debug, Default)]
pub struct BackoffTracker {
    config: BackoffConfig,
    states: HashMap<DbId, BackoffState>,
}

impl BackoffTracker {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    /// Current state for `id` (the default active state if never touched).
    pub fn state(&self, id: DbId) -> BackoffState {
        self.states.get(&id).copied().unwrap_or_default()
    }

    /// A fetch for `id` merged successfully. Idempotent.
    pub fn record_success(&mut self, id: DbId) {
        self.states.insert(id, BackoffState::default());
    }

    /// A fetch for `id` failed (no data, transport or malformed response).
    pub fn record_failure(&mut self, id: DbId, now: Instant) -> FailureOutcome {
        let max_retries = self.config.max_retries;
        let state = self.states.entry(id).or_default();

        if state.suspended {
            return FailureOutcome::AlreadySuspended;
        }

        state.retry_count += 1;
        if state.retry_count < max_retries {
            return FailureOutcome::Retrying {
                retry_count: state.retry_count,
            };
        }

        state.suspensions += 1;
        let delay = suspension_delay(state.suspensions, &self.config);
        state.suspended = true;
        state.next_attempt_at = Some(now.checked_add(delay).unwrap_or(now));

        FailureOutcome::Suspended {
            retry_count: state.retry_count,
            delay,
        }
    }

    /// Whether `id` may be fetched at `now`.
    ///
    /// A suspended entity whose delay has elapsed is resumed here: it turns
    /// active with `retry_count` reset to zero.
    pub fn is_eligible(&mut self, id: DbId, now: Instant) -> bool {
        let Some(state) = self.states.get_mut(&id) else {
            return true;
        };

        match state.next_attempt_at {
            Some(at) if state.suspended => {
                if now < at {
                    return false;
                }
                state.suspended = false;
                state.next_attempt_at = None;
                state.retry_count = 0;
                true
            }
            _ => true,
        }
    }

    /// Force `id` back to active with zero retries.
    pub fn reset(&mut self, id: DbId) {
        self.states.remove(&id);
    }

    /// Force every entity back to active with zero retries.
    pub fn reset_all(&mut self) {
        self.states.clear();
    }

    /// Ids currently suspended.
    pub fn suspended_ids(&self) -> Vec<DbId> {
        let mut ids: Vec<DbId> = self
            .states
            .iter()
            .filter(|(_, s)| s.suspended)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
