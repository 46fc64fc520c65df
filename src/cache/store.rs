//! Reference Tier Store
//!
//! Maps key ids to entries holding up to three handles, of decreasing
//! strength, to the same table. Single source of truth for presence.
//!
//! ```text
//!   strong ──► Payload ◄── PayloadCell ◄── weak
//!                              ▲
//!                              └────────── recent
//! ```
//!
//! Keeping the recency index in step with the `recent` handles is the
//! engine's job; the store only installs and drops them on request.
//!
//! Keys are held weakly. Every stored key posts its id on the store's orphan
//! queue when its last owner drops it, so expunging touches only those
//! entries.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};

use super::entry::{CacheKey, Payload, RetentionTier, WeakKey};
use super::handle::{Clearance, PayloadCell, RecentHandle, WeakHandle};
use super::reclaim::CellRegistry;

/// Per-key bookkeeping
pub(crate) struct CacheEntry<R> {
    key: WeakKey,
    strong: Option<Payload<R>>,
    recent: Option<RecentHandle<R>>,
    weak: WeakHandle<R>,
}

impl<R> CacheEntry<R> {
    pub(crate) fn has_strong(&self) -> bool {
        self.strong.is_some()
    }

    pub(crate) fn has_recent(&self) -> bool {
        self.recent.is_some()
    }

    /// Recent handle present and its table not yet reclaimed
    pub(crate) fn recent_alive(&self) -> bool {
        self.recent.as_ref().is_some_and(RecentHandle::is_alive)
    }

    pub(crate) fn weak_payload(&self) -> Option<Payload<R>> {
        self.weak.get()
    }

    pub(crate) fn tier(&self) -> RetentionTier {
        if self.weak.is_cleared() {
            RetentionTier::Absent
        } else if self.strong.is_some() {
            RetentionTier::Strong
        } else if self.recent.is_some() {
            RetentionTier::Recent
        } else {
            RetentionTier::Weak
        }
    }
}

/// Entry counts per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheOccupancy {
    /// Entries whose table has not been reclaimed
    pub entries: usize,
    /// Entries pinned by a strong handle
    pub strong: usize,
    /// Entries holding a recent handle
    pub recent: usize,
    /// Live entries protected by nothing but the weak handle
    pub weak_only: usize,
}

pub(crate) struct ReferenceTierStore<R> {
    entries: HashMap<u64, CacheEntry<R>>,
    registry: Arc<CellRegistry<R>>,
    clearances: Sender<Clearance>,
    orphan_tx: Sender<u64>,
    orphan_rx: Receiver<u64>,
}

impl<R> ReferenceTierStore<R> {
    pub(crate) fn new(registry: Arc<CellRegistry<R>>, clearances: Sender<Clearance>) -> Self {
        let (orphan_tx, orphan_rx) = unbounded();
        Self {
            entries: HashMap::new(),
            registry,
            clearances,
            orphan_tx,
            orphan_rx,
        }
    }

    /// Store `rows` under `key` with all three handles, replacing any prior entry
    pub(crate) fn put(&mut self, key: &CacheKey, rows: Vec<R>) -> Payload<R> {
        let payload = Payload::from_rows(rows);
        let cell = PayloadCell::new(key.id(), payload.clone(), self.clearances.clone());
        self.registry.register(&cell);
        key.watch(&self.orphan_tx);

        let weak = WeakHandle::new(cell);
        let entry = CacheEntry {
            key: key.downgrade(),
            strong: Some(payload.clone()),
            recent: Some(weak.recent()),
            weak,
        };
        self.entries.insert(key.id(), entry);
        payload
    }

    /// Drop the strong handle; returns whether one was present
    pub(crate) fn clear_for_reclaim(&mut self, key_id: u64) -> bool {
        self.entries
            .get_mut(&key_id)
            .and_then(|entry| entry.strong.take())
            .is_some()
    }

    pub(crate) fn contains(&self, key_id: u64) -> bool {
        self.entries
            .get(&key_id)
            .is_some_and(|entry| !entry.weak.is_cleared())
    }

    /// Remove every handle for the key
    pub(crate) fn invalidate(&mut self, key_id: u64) -> bool {
        self.entries.remove(&key_id).is_some()
    }

    pub(crate) fn entry(&self, key_id: u64) -> Option<&CacheEntry<R>> {
        self.entries.get(&key_id)
    }

    /// Install a recent handle, or refresh the existing one
    pub(crate) fn attach_recent(&mut self, key_id: u64) {
        if let Some(entry) = self.entries.get_mut(&key_id) {
            if let Some(recent) = &entry.recent {
                recent.touch();
            } else {
                entry.recent = Some(entry.weak.recent());
            }
        }
    }

    /// Drop the recent handle only; the weak handle stays
    pub(crate) fn drop_recent(&mut self, key_id: u64) -> bool {
        self.entries
            .get_mut(&key_id)
            .and_then(|entry| entry.recent.take())
            .is_some()
    }

    /// Remove entries whose keys were reported dropped, returning their ids
    pub(crate) fn expunge_orphans(&mut self) -> Vec<u64> {
        let mut expunged = Vec::new();
        for id in self.orphan_rx.try_iter() {
            let orphaned = self
                .entries
                .get(&id)
                .is_some_and(|entry| entry.key.is_orphaned());
            if orphaned {
                self.entries.remove(&id);
                expunged.push(id);
            }
        }
        expunged
    }

    /// Entries holding a recent handle, reclaimed or not
    pub(crate) fn recent_handles(&self) -> usize {
        self.entries.values().filter(|entry| entry.has_recent()).count()
    }

    pub(crate) fn occupancy(&self) -> CacheOccupancy {
        let mut occupancy = CacheOccupancy::default();
        for entry in self.entries.values() {
            match entry.tier() {
                RetentionTier::Absent => continue,
                RetentionTier::Strong => occupancy.strong += 1,
                RetentionTier::Recent => {}
                RetentionTier::Weak => occupancy.weak_only += 1,
            }
            occupancy.entries += 1;
            if entry.has_recent() {
                occupancy.recent += 1;
            }
        }
        occupancy
    }

    /// Number of entries, including ones reclaimed but not yet swept
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
