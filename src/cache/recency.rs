//! Bounded Recency Index
//!
//! Fixed-capacity least-recently-used index over key ids. Membership decides
//! which reclaimable tables also hold a recent handle.
//!
//! # Design
//!
//! - `ticks` maps key id to its last touch; `order` maps touch to key id
//! - Touch, remove and eviction are O(log K)
//! - Evicted ids are returned to the caller, never dropped silently

use std::collections::{BTreeMap, HashMap};

/// Default number of recently used tables kept under a recent handle
pub const DEFAULT_RECENCY_CAPACITY: usize = 32;

/// LRU index over key ids, capped at `capacity` members
#[derive(Debug, Clone)]
pub struct BoundedRecencyIndex {
    capacity: usize,
    clock: u64,
    ticks: HashMap<u64, u64>,
    order: BTreeMap<u64, u64>,
}

impl BoundedRecencyIndex {
    /// Create an index holding at most `capacity` keys
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "recency capacity must be at least 1");
        Self {
            capacity: capacity.max(1),
            clock: 0,
            ticks: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    /// Mark `key_id` as most recently used.
    ///
    /// Inserting a new key into a full index evicts the least recently
    /// touched member, whose id is returned.
    pub fn touch(&mut self, key_id: u64) -> Option<u64> {
        self.clock += 1;
        let tick = self.clock;

        if let Some(previous) = self.ticks.insert(key_id, tick) {
            self.order.remove(&previous);
            self.order.insert(tick, key_id);
            return None;
        }
        self.order.insert(tick, key_id);

        if self.ticks.len() > self.capacity {
            let (_, evicted) = self.order.pop_first()?;
            self.ticks.remove(&evicted);
            return Some(evicted);
        }
        None
    }

    /// Remove `key_id` without disturbing the order of other members
    pub fn remove(&mut self, key_id: u64) -> bool {
        match self.ticks.remove(&key_id) {
            Some(tick) => {
                self.order.remove(&tick);
                true
            }
            None => false,
        }
    }

    /// Check membership
    pub fn contains(&self, key_id: u64) -> bool {
        self.ticks.contains_key(&key_id)
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Maximum number of members
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for BoundedRecencyIndex {
    fn default() -> Self {
        Self::new(DEFAULT_RECENCY_CAPACITY)
    }
}

// =============================================================================
// Tests
// =============================================================================
