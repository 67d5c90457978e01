//! The per-patient record held by the registry.

use serde::{Deserialize, Serialize};

use crate::reading::PartialReading;
use crate::risk::{classify, RiskLevel};
use crate::types::{DbId, Timestamp};

/// Default number of points kept per history channel.
pub const DEFAULT_HISTORY_LIMIT: usize = 30;

/// Which producer feeds an entity's readings. Fixed for the record's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetrySource {
    /// Readings come from the deterministic simulated series.
    #[default]
    Simulated,
    /// Readings come from the remote sensor feed.
    Live,
}

/// A monitored patient with current readings, bounded history and derived risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: DbId,
    pub name: String,
    #[serde(default)]
    pub source: TelemetrySource,
    /// Current value per channel; each channel is independently nullable.
    #[serde(default)]
    pub current: PartialReading,
    /// Heart rate samples, most recent last.
    #[serde(default)]
    pub heart_rate_history: Vec<f64>,
    /// Temperature samples, most recent last.
    #[serde(default)]
    pub temperature_history: Vec<f64>,
    #[serde(default)]
    pub risk: RiskLevel,
    /// RFC 3339 time of the last merge, `None` until the first one.
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl EntityRecord {
    pub fn new(id: DbId, name: impl Into<String>, source: TelemetrySource) -> Self {
        Self {
            id,
            name: name.into(),
            source,
            current: PartialReading::default(),
            heart_rate_history: Vec::new(),
            temperature_history: Vec::new(),
            risk: RiskLevel::Low,
            last_updated: None,
        }
    }

    /// Builder: set the current readings and recompute risk.
    pub fn with_readings(mut self, readings: PartialReading) -> Self {
        self.current = readings;
        self.reclassify();
        self
    }

    /// Recompute `risk` from the current heart rate and temperature.
    pub fn reclassify(&mut self) {
        self.risk = classify(self.current.heart_rate, self.current.temperature);
    }

    /// Shallow field-level merge of `update` into this record.
    ///
    /// Present channels override, absent channels are preserved. New heart
    /// rate and temperature values are appended to their history (bounded by
    /// `history_limit`), risk is recomputed and `last_updated` is stamped.
    pub fn apply(&mut self, update: &PartialReading, history_limit: usize, now: Timestamp) {
        self.current.overlay(update);

        if let Some(hr) = update.heart_rate {
            push_bounded(&mut self.heart_rate_history, hr, history_limit);
        }
        if let Some(temp) = update.temperature {
            push_bounded(&mut self.temperature_history, temp, history_limit);
        }

        self.reclassify();
        self.last_updated = Some(now.to_rfc3339());
    }
}

/// Append `value`, dropping the oldest entries beyond `limit`.
pub fn push_bounded(history: &mut Vec<f64>, value: f64, limit: usize) {
    history.push(value);
    if history.len() > limit {
        let excess = history.len() - limit;
        history.drain(..excess);
    }
}
