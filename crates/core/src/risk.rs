//! Risk classification from current vital signs.
//!
//! Pure logic. The registry calls [`classify`] after every merge and stores
//! the result on the record.

use serde::{Deserialize, Serialize};

/// Heart rate strictly above this is high risk.
pub const HEART_RATE_HIGH_ABOVE: f64 = 100.0;
/// Heart rate strictly below this is high risk.
pub const HEART_RATE_HIGH_BELOW: f64 = 55.0;
/// Heart rate strictly above this (and not high) is medium risk.
pub const HEART_RATE_MEDIUM_ABOVE: f64 = 85.0;
/// Heart rate strictly below this (and not high) is medium risk.
pub const HEART_RATE_MEDIUM_BELOW: f64 = 60.0;

/// Temperature at or above this is high risk (fever).
pub const TEMPERATURE_HIGH_AT_OR_ABOVE: f64 = 38.0;
/// Temperature at or below this is high risk (hypothermia).
pub const TEMPERATURE_HIGH_AT_OR_BELOW: f64 = 35.7;
/// Temperature at or above this (and not high) is medium risk.
pub const TEMPERATURE_MEDIUM_AT_OR_ABOVE: f64 = 37.5;
/// Temperature strictly below this (and not high) is medium risk.
pub const TEMPERATURE_MEDIUM_BELOW: f64 = 36.0;

/// Discrete risk level derived from heart rate and temperature.
///
/// The derived `Ord` is the display order: `High < Medium < Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    High,
    Medium,
    #[default]
    Low,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a pair of readings. First match wins: high, then medium, then low.
///
/// An absent reading never matches any threshold, so `(None, None)` is low.
pub fn classify(heart_rate: Option<f64>, temperature: Option<f64>) -> RiskLevel {
    if is_high(heart_rate, temperature) {
        RiskLevel::High
    } else if is_medium(heart_rate, temperature) {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

fn is_high(heart_rate: Option<f64>, temperature: Option<f64>) -> bool {
    let hr = heart_rate.is_some_and(|hr| hr > HEART_RATE_HIGH_ABOVE || hr < HEART_RATE_HIGH_BELOW);
    let temp = temperature
        .is_some_and(|t| t >= TEMPERATURE_HIGH_AT_OR_ABOVE || t <= TEMPERATURE_HIGH_AT_OR_BELOW);
    hr || temp
}

fn is_medium(heart_rate: Option<f64>, temperature: Option<f64>) -> bool {
    let hr = heart_rate.is_some_and(|hr| {
        (hr > HEART_RATE_MEDIUM_ABOVE && hr <= HEART_RATE_HIGH_ABOVE)
            || (hr >= HEART_RATE_HIGH_BELOW && hr < HEART_RATE_MEDIUM_BELOW)
    });
    let temp = temperature.is_some_and(|t| {
        (t >= TEMPERATURE_MEDIUM_AT_OR_ABOVE && t < TEMPERATURE_HIGH_AT_OR_ABOVE)
            || (t > TEMPERATURE_HIGH_AT_OR_BELOW && t < TEMPERATURE_MEDIUM_BELOW)
    });
    hr || temp
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
