//! Cache Engine - Tiered Table Cache Facade
//!
//! Composes the reference tier store, the bounded recency index and the
//! statistics recorder under one exclusive lock. Every public operation is
//! atomic with respect to the others; the reclaimer works concurrently and
//! never takes this lock.
//!
//! Entries of dropped keys are expunged whenever the lock is taken.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::unbounded;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::entry::{CacheKey, CachedBuffer, Payload, RetentionTier};
use super::reclaim::{CellRegistry, Reclaimer};
use super::recency::{BoundedRecencyIndex, DEFAULT_RECENCY_CAPACITY};
use super::stats::{AccessOutcome, CacheStatistics, StatisticsRecorder, DEFAULT_STATISTICS_INTERVAL};
use super::store::{CacheOccupancy, ReferenceTierStore};
use crate::error::{Error, Result};

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of tables held under a recent handle
    pub recency_capacity: usize,
    /// Minimum seconds between two statistics events
    pub statistics_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            recency_capacity: DEFAULT_RECENCY_CAPACITY,
            statistics_interval_secs: DEFAULT_STATISTICS_INTERVAL.as_secs(),
        }
    }
}

impl CacheConfig {
    /// Parse a YAML document; missing fields take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Reject values the engine cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.recency_capacity == 0 {
            return Err(Error::InvalidArgument(
                "recency_capacity must be at least 1".to_string(),
            ));
        }
        if self.statistics_interval_secs == 0 {
            return Err(Error::InvalidArgument(
                "statistics_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Statistics interval as a duration
    pub fn statistics_interval(&self) -> Duration {
        Duration::from_secs(self.statistics_interval_secs)
    }
}

/// Result of a classified lookup
#[derive(Debug)]
pub struct CacheLookup<R> {
    /// The cached table, if present
    pub payload: Option<Payload<R>>,
    /// How the access was classified
    pub outcome: AccessOutcome,
}

struct EngineState<R> {
    store: ReferenceTierStore<R>,
    recency: BoundedRecencyIndex,
    stats: StatisticsRecorder,
}

impl<R> EngineState<R> {
    /// Give `key_id` a recent handle at the front of the recency index
    fn promote(&mut self, key_id: u64) {
        if let Some(evicted) = self.recency.touch(key_id) {
            self.store.drop_recent(evicted);
        }
        self.store.attach_recent(key_id);
    }

    /// Drop entries of keys reported dropped, with their recency slots
    fn expunge_orphans(&mut self) -> usize {
        let orphans = self.store.expunge_orphans();
        for id in &orphans {
            self.recency.remove(*id);
        }
        if !orphans.is_empty() {
            debug!(count = orphans.len(), "Expunged entries of dropped keys");
        }
        orphans.len()
    }

    /// Recency index and recent handles name the same entries
    fn recency_in_step(&self) -> bool {
        self.recency.len() == self.store.recent_handles()
    }

    fn forget(&mut self, key_id: u64) -> bool {
        self.recency.remove(key_id);
        self.store.invalidate(key_id)
    }

    fn resolve(&mut self, key: &CacheKey) -> (Option<Payload<R>>, AccessOutcome) {
        let key_id = key.id();
        let Some(entry) = self.store.entry(key_id) else {
            return (None, AccessOutcome::Miss);
        };

        let mut outcome = None;
        if entry.has_strong() {
            outcome = Some(AccessOutcome::HardHit);
        }
        if outcome.is_none() && entry.recent_alive() {
            outcome = Some(AccessOutcome::SoftHit);
        }

        match entry.weak_payload() {
            Some(payload) => {
                self.promote(key_id);
                (Some(payload), outcome.unwrap_or(AccessOutcome::WeakHit))
            }
            None => {
                self.forget(key_id);
                debug!(key = %key, "Swept reclaimed table");
                (None, AccessOutcome::Miss)
            }
        }
    }
}

/// Tiered in-memory table cache
pub struct CacheEngine<R> {
    state: Mutex<EngineState<R>>,
    registry: Arc<CellRegistry<R>>,
    config: CacheConfig,
}

impl<R> CacheEngine<R> {
    /// Create an engine with default configuration
    pub fn new() -> Self {
        Self::build(CacheConfig::default())
    }

    /// Create an engine with custom configuration
    pub fn with_config(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: CacheConfig) -> Self {
        let (tx, rx) = unbounded();
        let registry = Arc::new(CellRegistry::new());
        let state = EngineState {
            store: ReferenceTierStore::new(Arc::clone(&registry), tx),
            recency: BoundedRecencyIndex::new(config.recency_capacity),
            stats: StatisticsRecorder::new(rx, config.statistics_interval()),
        };
        Self {
            state: Mutex::new(state),
            registry,
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState<R>> {
        let mut state = self.state.lock();
        state.expunge_orphans();
        state
    }

    /// Cache a fully materialized table under `key`, pinned until cleared
    /// for reclaim. Replaces any table previously cached under the key.
    ///
    /// Returns the immutable view that was stored.
    pub fn put(&self, key: &CacheKey, rows: Vec<R>) -> Payload<R> {
        let mut state = self.lock();

        let payload = state.store.put(key, rows);
        if let Some(evicted) = state.recency.touch(key.id()) {
            state.store.drop_recent(evicted);
        }
        state.stats.record_put();

        trace!(key = %key, rows = payload.len(), "Cached table");
        payload
    }

    /// Allow the reclaimer to drop the buffer's table.
    ///
    /// # Panics
    ///
    /// Panics if the buffer has not been durably persisted: clearing it
    /// would let the only copy of the table disappear.
    pub fn clear_for_reclaim<B: CachedBuffer + ?Sized>(&self, buffer: &B) {
        let key = buffer.cache_key();
        assert!(
            buffer.is_durably_persisted(),
            "table for {key} cleared for reclaim before it was persisted"
        );

        if self.lock().store.clear_for_reclaim(key.id()) {
            trace!(key = %key, "Cleared table for reclaim");
        }
    }

    /// True if the table is cached and not reclaimed. No side effects.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().store.contains(key.id())
    }

    /// Retrieve the table, updating statistics and recency
    pub fn get(&self, key: &CacheKey) -> Option<Payload<R>> {
        self.lookup(key).payload
    }

    /// Retrieve the table together with its hit/miss classification
    pub fn lookup(&self, key: &CacheKey) -> CacheLookup<R> {
        let mut state = self.lock();
        let (payload, outcome) = state.resolve(key);
        if let Some(stats) = state.stats.record_access(outcome, Instant::now()) {
            trace!(
                accesses = stats.accesses,
                hit_ratio = stats.hit_ratio(),
                "Statistics interval elapsed"
            );
        }
        CacheLookup { payload, outcome }
    }

    /// Retrieve the table without touching statistics or recency order
    pub fn get_silent(&self, key: &CacheKey) -> Option<Payload<R>> {
        self.lock()
            .store
            .entry(key.id())
            .and_then(|entry| entry.weak_payload())
    }

    /// Remove every trace of the table
    pub fn invalidate(&self, key: &CacheKey) {
        if self.lock().forget(key.id()) {
            trace!(key = %key, "Invalidated table");
        }
    }

    /// Strongest handle currently protecting the table. No side effects.
    pub fn tier(&self, key: &CacheKey) -> RetentionTier {
        self.lock()
            .store
            .entry(key.id())
            .map_or(RetentionTier::Absent, |entry| entry.tier())
    }

    /// Drop entries whose keys have no owners left; returns how many
    pub fn purge_orphans(&self) -> usize {
        self.state.lock().expunge_orphans()
    }

    /// Counter snapshot, including reclaims not yet seen by a lookup
    pub fn statistics(&self) -> CacheStatistics {
        self.lock().stats.snapshot()
    }

    /// Entry counts per tier
    pub fn occupancy(&self) -> CacheOccupancy {
        self.lock().store.occupancy()
    }

    /// Number of entries, including reclaimed ones not yet swept
    pub fn len(&self) -> usize {
        self.lock().store.len()
    }

    /// Check if the engine holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handle for the external memory manager
    pub fn reclaimer(&self) -> Reclaimer<R> {
        Reclaimer::new(Arc::clone(&self.registry))
    }

    /// Get configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn recency_in_step(&self) -> bool {
        self.state.lock().recency_in_step()
    }
}

impl<R> fmt::Debug for CacheEngine<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<R> Default for CacheEngine<R> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
