//! The authoritative in-memory set of patient records.
//!
//! [`Registry`] is the only place record state changes. Every change is a
//! merge into an existing record: live readings via [`Registry::merge`],
//! simulated readings via [`Registry::advance_simulation`]. A record's
//! producer is fixed by its [`TelemetrySource`] and a merge from the other
//! producer is rejected.
//!
//! The registry is not internally synchronised; the monitor wraps it in a
//! `tokio::sync::RwLock` so merges are serialised.

use std::collections::{HashMap, HashSet};

use vitalwatch_core::reading::PartialReading;
use vitalwatch_core::record::{EntityRecord, TelemetrySource, DEFAULT_HISTORY_LIMIT};
use vitalwatch_core::simulation::SimulationGenerator;
use vitalwatch_core::types::{DbId, Timestamp};

/// Errors from registry mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No record with this id is loaded.
    #[error("Entity {0} not found")]
    NotFound(DbId),

    /// A seed contained the same id twice.
    #[error("Entity {0} appears more than once in the seed")]
    DuplicateId(DbId),

    /// The update came from a producer that does not own this record.
    #[error("Entity {id} is fed by {owner:?}, rejected update from {producer:?}")]
    WrongProducer {
        id: DbId,
        owner: TelemetrySource,
        producer: TelemetrySource,
    },

    /// The monitor has been shut down.
    #[error("Registry is closed")]
    Closed,
}

#[derive(Debug)]
pub struct Registry {
    /// Records in load order. View ties are broken by this order.
    records: Vec<EntityRecord>,
    index: HashMap<DbId, usize>,
    /// Bumped on every seed so stale in-flight results can be detected.
    generation: u64,
    history_limit: usize,
    generator: SimulationGenerator,
    /// Simulation tick counter. Reset only by a seed.
    tick: u64,
    closed: bool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl Registry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
            generation: 0,
            history_limit,
            generator: SimulationGenerator::new(),
            tick: 0,
            closed: false,
        }
    }

    /// Replace the whole registry.
    ///
    /// Risk is recomputed for every record, the simulation series are
    /// rebuilt for the simulated ones and the tick counter restarts at zero.
    /// Returns the new generation.
    pub fn seed(&mut self, records: Vec<EntityRecord>) -> Result<u64, RegistryError> {
        if self.closed {
            return Err(RegistryError::Closed);
        }

        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(record.id) {
                return Err(RegistryError::DuplicateId(record.id));
            }
        }

        let mut records = records;
        for record in &mut records {
            record.reclassify();
        }

        self.generator = SimulationGenerator::for_entities(
            records
                .iter()
                .filter(|r| r.source == TelemetrySource::Simulated)
                .map(|r| r.id),
        );
        self.index = records
            .iter()
            .enumerate()
            .map(|(pos, r)| (r.id, pos))
            .collect();
        self.records = records;
        self.tick = 0;
        self.generation += 1;

        Ok(self.generation)
    }

    /// Merge a partial update into record `id` on behalf of `producer`.
    pub fn merge(
        &mut self,
        id: DbId,
        update: &PartialReading,
        producer: TelemetrySource,
        now: Timestamp,
    ) -> Result<&EntityRecord, RegistryError> {
        if self.closed {
            return Err(RegistryError::Closed);
        }

        let pos = *self.index.get(&id).ok_or(RegistryError::NotFound(id))?;
        let record = &mut self.records[pos];
        if record.source != producer {
            return Err(RegistryError::WrongProducer {
                id,
                owner: record.source,
                producer,
            });
        }

        record.apply(update, self.history_limit, now);
        Ok(record)
    }

    /// Advance the tick counter and apply the next simulated sample to every
    /// simulated record in one batch. Returns `(tick, updated)`.
    ///
    /// Simulated records without a series are left untouched.
    pub fn advance_simulation(&mut self, now: Timestamp) -> Result<(u64, usize), RegistryError> {
        if self.closed {
            return Err(RegistryError::Closed);
        }

        self.tick += 1;
        let tick = self.tick;
        let limit = self.history_limit;
        let generator = &self.generator;

        let mut updated = 0;
        for record in self
            .records
            .iter_mut()
            .filter(|r| r.source == TelemetrySource::Simulated)
        {
            if generator.apply_tick(record, tick, limit, now) {
                updated += 1;
            }
        }

        Ok((tick, updated))
    }

    /// Stop accepting changes. Reads keep working.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn get(&self, id: DbId) -> Option<&EntityRecord> {
        self.index.get(&id).map(|&pos| &self.records[pos])
    }

    /// Owned copy of every record, in load order.
    pub fn snapshot(&self) -> Vec<EntityRecord> {
        self.records.clone()
    }

    /// Ids fed by the live poller, in load order.
    pub fn live_ids(&self) -> Vec<DbId> {
        self.ids_for(TelemetrySource::Live)
    }

    /// Ids fed by the simulation, in load order.
    pub fn simulated_ids(&self) -> Vec<DbId> {
        self.ids_for(TelemetrySource::Simulated)
    }

    /// Mutable access to the simulation series, e.g. to install custom ones.
    pub fn generator_mut(&mut self) -> &mut SimulationGenerator {
        &mut self.generator
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn ids_for(&self, source: TelemetrySource) -> Vec<DbId> {
        self.records
            .iter()
            .filter(|r| r.source == source)
            .map(|r| r.id)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
