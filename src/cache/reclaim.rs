//! Reclaiming Agent Interface
//!
//! The cache never frees tables on its own. A memory manager holding a
//! [`Reclaimer`] decides when to clear cells, without taking the engine lock.
//!
//! # Eligibility
//!
//! A cell may be cleared only while it holds the sole reference to its
//! table: no strong handle, and no consumer still reading a clone.
//!
//! # Order
//!
//! Cells without a recent handle go first, then recently held cells in
//! least-recently-used order.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use super::handle::PayloadCell;

/// Every cell the engine has created that may still be alive
pub(crate) struct CellRegistry<R> {
    cells: Mutex<Vec<Weak<PayloadCell<R>>>>,
}

impl<R> CellRegistry<R> {
    pub(crate) fn new() -> Self {
        Self {
            cells: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, cell: &Arc<PayloadCell<R>>) {
        let mut cells = self.cells.lock();
        // Compact before the vector would grow
        if cells.len() == cells.capacity() {
            cells.retain(|weak| weak.strong_count() > 0);
        }
        cells.push(Arc::downgrade(cell));
    }

    /// Upgrade all cells that still exist, pruning dead ones
    pub(crate) fn live(&self) -> Vec<Arc<PayloadCell<R>>> {
        let mut cells = self.cells.lock();
        cells.retain(|weak| weak.strong_count() > 0);
        cells.iter().filter_map(Weak::upgrade).collect()
    }
}

/// How much the memory manager wants freed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressure {
    /// Clear every eligible table that is not recently used
    WeakOnly,
    /// Clear at most this many eligible tables
    Bounded(usize),
    /// Clear every eligible table
    Full,
}

/// Outcome of one reclaim pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    /// Tables cleared that held no recent handle
    pub weak_cleared: usize,
    /// Tables cleared despite a recent handle
    pub recent_cleared: usize,
}

impl ReclaimReport {
    /// Total tables cleared
    pub fn total(&self) -> usize {
        self.weak_cleared + self.recent_cleared
    }

    /// Accumulate another pass into this report
    pub fn merge(&mut self, other: ReclaimReport) {
        self.weak_cleared += other.weak_cleared;
        self.recent_cleared += other.recent_cleared;
    }
}

/// Handle through which an external memory manager frees cached tables
pub struct Reclaimer<R> {
    registry: Arc<CellRegistry<R>>,
}

impl<R> Clone for Reclaimer<R> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<R> Reclaimer<R> {
    pub(crate) fn new(registry: Arc<CellRegistry<R>>) -> Self {
        Self { registry }
    }

    /// Clear tables according to `pressure`
    pub fn reclaim(&self, pressure: Pressure) -> ReclaimReport {
        let (weak_only, mut recent): (Vec<_>, Vec<_>) = self
            .registry
            .live()
            .into_iter()
            .filter(|cell| cell.is_reclaimable())
            .partition(|cell| !cell.is_recently_held());
        recent.sort_by_key(|cell| cell.last_used());

        let mut budget = match pressure {
            Pressure::Bounded(n) => n,
            Pressure::WeakOnly | Pressure::Full => usize::MAX,
        };
        let mut report = ReclaimReport::default();

        for cell in &weak_only {
            if budget == 0 {
                break;
            }
            if cell.try_clear().is_some() {
                trace!(key_id = cell.key_id(), "Reclaimed weakly held table");
                report.weak_cleared += 1;
                budget -= 1;
            }
        }

        if pressure != Pressure::WeakOnly {
            for cell in &recent {
                if budget == 0 {
                    break;
                }
                if cell.try_clear().is_some() {
                    trace!(key_id = cell.key_id(), "Reclaimed recently used table");
                    report.recent_cleared += 1;
                    budget -= 1;
                }
            }
        }

        if report.total() > 0 {
            debug!(
                ?pressure,
                weak_cleared = report.weak_cleared,
                recent_cleared = report.recent_cleared,
                "Reclaim pass finished"
            );
        }
        report
    }

    /// Number of tables that could be cleared right now
    pub fn reclaimable(&self) -> usize {
        self.registry
            .live()
            .iter()
            .filter(|cell| cell.is_reclaimable())
            .count()
    }

    /// Number of cells still tracked (alive or cleared but not yet dropped)
    pub fn tracked(&self) -> usize {
        self.registry.live().len()
    }
}

// =============================================================================
// Tests
// =============================================================================
