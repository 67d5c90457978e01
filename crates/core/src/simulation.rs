//! Deterministic simulated telemetry for entities without a live feed.
//!
//! Each simulated entity gets a fixed-length heart rate and temperature
//! series, computed once. A shared tick counter indexes into it
//! (`tick mod len`), so the stream cycles forever and is reproducible.

use std::collections::HashMap;
use std::f64::consts::TAU;

use crate::reading::PartialReading;
use crate::record::EntityRecord;
use crate::types::{DbId, Timestamp};

/// Number of samples in every generated series.
pub const SERIES_LEN: usize = 30;

/// Baseline and amplitude for one simulated patient profile.
#[derive(Debug, Clone, Copy)]
struct Profile {
    heart_rate_base: f64,
    heart_rate_amplitude: f64,
    temperature_base: f64,
    temperature_amplitude: f64,
}

/// Stable, elevated and deteriorating patients, picked by id.
const PROFILES: [Profile; 3] = [
    Profile {
        heart_rate_base: 74.0,
        heart_rate_amplitude: 6.0,
        temperature_base: 36.6,
        temperature_amplitude: 0.3,
    },
    Profile {
        heart_rate_base: 88.0,
        heart_rate_amplitude: 8.0,
        temperature_base: 37.3,
        temperature_amplitude: 0.35,
    },
    Profile {
        heart_rate_base: 98.0,
        heart_rate_amplitude: 10.0,
        temperature_base: 37.8,
        temperature_amplitude: 0.4,
    },
];

/// Precomputed per-channel series for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedSeries {
    pub heart_rate: Vec<f64>,
    pub temperature: Vec<f64>,
}

impl SimulatedSeries {
    /// Build a series from explicit samples.
    pub fn new(heart_rate: Vec<f64>, temperature: Vec<f64>) -> Self {
        Self {
            heart_rate,
            temperature,
        }
    }

    /// The built-in deterministic series for `id`.
    pub fn for_entity(id: DbId) -> Self {
        let profile = PROFILES[id.rem_euclid(PROFILES.len() as i64) as usize];
        let phase = id.rem_euclid(SERIES_LEN as i64) as f64;
        let len = SERIES_LEN as f64;

        let heart_rate = (0..SERIES_LEN)
            .map(|i| {
                let angle = TAU * (i as f64 + phase) / len;
                (profile.heart_rate_base + profile.heart_rate_amplitude * angle.sin()).round()
            })
            .collect();

        let temperature = (0..SERIES_LEN)
            .map(|i| {
                let angle = TAU * (i as f64 + phase) / len;
                let t = profile.temperature_base + profile.temperature_amplitude * angle.cos();
                (t * 10.0).round() / 10.0
            })
            .collect();

        Self {
            heart_rate,
            temperature,
        }
    }

    /// The sample at `tick`. Channels with an empty series are left absent.
    pub fn sample(&self, tick: u64) -> PartialReading {
        PartialReading {
            heart_rate: at(&self.heart_rate, tick),
            temperature: at(&self.temperature, tick),
            ..PartialReading::default()
        }
    }
}

fn at(series: &[f64], tick: u64) -> Option<f64> {
    if series.is_empty() {
        return None;
    }
    let idx = (tick % series.len() as u64) as usize;
    Some(series[idx])
}

/// The whole series, rotated so the sample *before* `tick` comes last and
/// trimmed to leave room for one more point under `limit`.
///
/// Appending the sample at `tick` afterwards yields the full cycle ending at
/// the current value.
fn history_before(series: &[f64], tick: u64, limit: usize) -> Vec<f64> {
    let n = series.len();
    if n == 0 {
        return Vec::new();
    }
    let start = ((tick + 1) % n as u64) as usize;
    let mut history: Vec<f64> = (0..n - 1).map(|k| series[(start + k) % n]).collect();
    let keep = limit.saturating_sub(1);
    if history.len() > keep {
        history.drain(..history.len() - keep);
    }
    history
}

/// Holds the simulated series for every simulated entity.
#[derive(Debug, Default)]
pub struct SimulationGenerator {
    series: HashMap<DbId, SimulatedSeries>,
}

impl SimulationGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generator with the built-in series for each id.
    pub fn for_entities(ids: impl IntoIterator<Item = DbId>) -> Self {
        Self {
            series: ids
                .into_iter()
                .map(|id| (id, SimulatedSeries::for_entity(id)))
                .collect(),
        }
    }

    pub fn insert(&mut self, id: DbId, series: SimulatedSeries) {
        self.series.insert(id, series);
    }

    /// The reading for `id` at `tick`, or `None` if `id` has no series.
    pub fn sample(&self, id: DbId, tick: u64) -> Option<PartialReading> {
        self.series.get(&id).map(|s| s.sample(tick))
    }

    /// Advance `record` to `tick`.
    ///
    /// Returns `false` (record untouched) when the entity has no series. On
    /// the first merge an empty history channel is filled with the whole
    /// cycle instead of a single point.
    pub fn apply_tick(
        &self,
        record: &mut EntityRecord,
        tick: u64,
        history_limit: usize,
        now: Timestamp,
    ) -> bool {
        let Some(series) = self.series.get(&record.id) else {
            return false;
        };

        if record.heart_rate_history.is_empty() {
            record.heart_rate_history = history_before(&series.heart_rate, tick, history_limit);
        }
        if record.temperature_history.is_empty() {
            record.temperature_history = history_before(&series.temperature, tick, history_limit);
        }

        record.apply(&series.sample(tick), history_limit, now);
        true
    }
}
