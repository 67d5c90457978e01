//! Change notifications broadcast by the monitor.
//!
//! Subscribers (typically the display layer) use these to know when to
//! re-read the projected view. Delivery is best-effort: a lagging receiver
//! drops old events, and sending with no receivers is not an error.

use serde::Serialize;
use vitalwatch_core::risk::RiskLevel;
use vitalwatch_core::types::DbId;

/// Broadcast channel capacity for monitor events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// The registry was (re)loaded from the backend.
    Seeded { count: usize, generation: u64 },
    /// One simulation tick was applied to every simulated entity.
    SimulationTick { tick: u64, updated: usize },
    /// A live reading was merged into an entity.
    EntityUpdated { entity_id: DbId, risk: RiskLevel },
    /// An entity hit the retry limit and is backing off.
    EntitySuspended {
        entity_id: DbId,
        retry_count: u32,
        delay_ms: u64,
    },
    /// The backend rejected the auth token.
    SessionInvalidated,
}
