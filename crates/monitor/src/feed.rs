//! The backend collaborator the monitor depends on.
//!
//! [`TelemetryFeed`] is the seam between the monitor and whatever serves
//! patient data; [`HttpTelemetryFeed`](crate::http_feed::HttpTelemetryFeed)
//! is the production implementation, tests use scripted in-memory feeds.

use async_trait::async_trait;
use vitalwatch_core::reading::PartialReading;
use vitalwatch_core::record::EntityRecord;
use vitalwatch_core::types::DbId;

/// Outcome of a successful live fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveFetch {
    /// The backend returned readings; absent fields were not reported.
    Reading(PartialReading),
    /// The backend has no data for this entity yet.
    NotFound,
}

/// Errors from the telemetry backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The auth token was rejected. Aborts the whole cycle.
    #[error("Session is no longer valid")]
    Unauthorized,

    /// The request failed (network, DNS, TLS, non-2xx status).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response arrived but could not be interpreted.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FeedError::Malformed(e.to_string())
        } else {
            FeedError::Transport(e.to_string())
        }
    }
}

#[async_trait]
pub trait TelemetryFeed: Send + Sync {
    /// Load every patient in `org_id`. Used for the initial seed and refreshes.
    async fn load_entities(
        &self,
        org_id: DbId,
        auth_token: &str,
    ) -> Result<Vec<EntityRecord>, FeedError>;

    /// Fetch the latest live reading for one patient.
    async fn fetch_live_reading(
        &self,
        entity_id: DbId,
        auth_token: &str,
    ) -> Result<LiveFetch, FeedError>;
}

/// Notified whenever the backend rejects the session.
///
/// May be invoked more than once; implementations must tolerate repeats.
pub trait SessionListener: Send + Sync {
    fn on_session_invalid(&self);
}

impl<F> SessionListener for F
where
    F: Fn() + Send + Sync,
{
    fn on_session_invalid(&self) {
        self()
    }
}
