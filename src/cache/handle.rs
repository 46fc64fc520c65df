//! Retention Handles
//!
//! A [`PayloadCell`] is the slot a cached table lives in. The store reaches
//! the table through a weak handle (the cell itself) and, while the table is
//! recently used, a recent handle. The strong tier is a plain [`Payload`]
//! clone, which keeps the cell from ever being the sole holder.
//!
//! Clearing a cell empties it and posts a [`Clearance`] on the queue the
//! statistics recorder drains.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;
use parking_lot::RwLock;

use super::entry::Payload;

/// Logical clock ordering recent handles by last use.
static RECENCY_CLOCK: AtomicU64 = AtomicU64::new(1);

#[inline]
fn next_tick() -> u64 {
    RECENCY_CLOCK.fetch_add(1, Ordering::Relaxed)
}

/// Notification that the reclaimer emptied a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clearance {
    /// Id of the key the table was cached under
    pub key_id: u64,
    /// Row count of the reclaimed table
    pub rows: usize,
    /// Whether a recent handle was still attached
    pub recently_used: bool,
}

pub(crate) struct PayloadCell<R> {
    key_id: u64,
    payload: RwLock<Option<Payload<R>>>,
    recent_holds: AtomicUsize,
    last_used: AtomicU64,
    clearances: Sender<Clearance>,
}

impl<R> PayloadCell<R> {
    pub(crate) fn new(key_id: u64, payload: Payload<R>, clearances: Sender<Clearance>) -> Arc<Self> {
        Arc::new(Self {
            key_id,
            payload: RwLock::new(Some(payload)),
            recent_holds: AtomicUsize::new(0),
            last_used: AtomicU64::new(next_tick()),
            clearances,
        })
    }

    #[inline]
    pub(crate) fn key_id(&self) -> u64 {
        self.key_id
    }

    pub(crate) fn get(&self) -> Option<Payload<R>> {
        self.payload.read().clone()
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.payload.read().is_some()
    }

    pub(crate) fn is_recently_held(&self) -> bool {
        self.recent_holds.load(Ordering::Acquire) > 0
    }

    pub(crate) fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }

    /// True if the cell holds the only reference to a live payload
    pub(crate) fn is_reclaimable(&self) -> bool {
        matches!(self.payload.read().as_ref(), Some(p) if p.holders() == 1)
    }

    /// Empty the cell if nothing else holds its payload.
    ///
    /// The holder count is checked under the write lock; readers clone only
    /// under the read lock, so no new holder can appear between the check and
    /// the clear.
    pub(crate) fn try_clear(&self) -> Option<Clearance> {
        let payload = {
            let mut slot = self.payload.write();
            if !matches!(slot.as_ref(), Some(p) if p.holders() == 1) {
                return None;
            }
            slot.take()?
        };

        let clearance = Clearance {
            key_id: self.key_id,
            rows: payload.len(),
            recently_used: self.is_recently_held(),
        };
        drop(payload);

        // The engine may already be gone; nobody is left to count it then.
        let _ = self.clearances.send(clearance);
        Some(clearance)
    }
}

/// Reclaimable reference to a cell; present for every stored table
pub(crate) struct WeakHandle<R> {
    cell: Arc<PayloadCell<R>>,
}

impl<R> WeakHandle<R> {
    pub(crate) fn new(cell: Arc<PayloadCell<R>>) -> Self {
        Self { cell }
    }

    pub(crate) fn get(&self) -> Option<Payload<R>> {
        self.cell.get()
    }

    pub(crate) fn is_cleared(&self) -> bool {
        !self.cell.is_alive()
    }

    pub(crate) fn recent(&self) -> RecentHandle<R> {
        RecentHandle::new(Arc::clone(&self.cell))
    }
}

/// Recency-bounded reference; marks its cell as recently held while alive
pub(crate) struct RecentHandle<R> {
    cell: Arc<PayloadCell<R>>,
}

impl<R> RecentHandle<R> {
    fn new(cell: Arc<PayloadCell<R>>) -> Self {
        cell.recent_holds.fetch_add(1, Ordering::AcqRel);
        cell.last_used.store(next_tick(), Ordering::Relaxed);
        Self { cell }
    }

    /// Record a use for least-recently-used reclaim ordering
    pub(crate) fn touch(&self) {
        self.cell.last_used.store(next_tick(), Ordering::Relaxed);
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.cell.is_alive()
    }
}

impl<R> Drop for RecentHandle<R> {
    fn drop(&mut self) {
        self.cell.recent_holds.fetch_sub(1, Ordering::AcqRel);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    #[test]
    fn test_cell_clear_requires_sole_holder() {
        let (tx, rx) = unbounded();
        let payload = Payload::from_rows(vec![1u32, 2]);
        let cell = PayloadCell::new(7, payload.clone(), tx);

        assert!(!cell.is_reclaimable());
        assert!(cell.try_clear().is_none());
        assert!(cell.is_alive());

        drop(payload);
        assert!(cell.is_reclaimable());

        let clearance = cell.try_clear().unwrap();
        assert_eq!(clearance.key_id, 7);
        assert_eq!(clearance.rows, 2);
        assert!(!clearance.recently_used);
        assert!(!cell.is_alive());
        assert_eq!(rx.try_recv().unwrap(), clearance);
    }

    #[test]
    fn test_cell_clears_once() {
        let (tx, rx) = unbounded();
        let cell = PayloadCell::new(1, Payload::from_rows(vec!['a']), tx);

        assert!(cell.try_clear().is_some());
        assert!(cell.try_clear().is_none());
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_recent_handle_marks_cell() {
        let (tx, _rx) = unbounded();
        let cell = PayloadCell::new(1, Payload::from_rows(vec![0u8]), tx);
        let weak = WeakHandle::new(Arc::clone(&cell));

        assert!(!cell.is_recently_held());
        let recent = weak.recent();
        assert!(cell.is_recently_held());
        assert!(recent.is_alive());

        let before = cell.last_used();
        recent.touch();
        assert!(cell.last_used() > before);

        drop(recent);
        assert!(!cell.is_recently_held());
    }

    #[test]
    fn test_clearance_reports_recent_hold() {
        let (tx, _rx) = unbounded();
        let cell = PayloadCell::new(3, Payload::from_rows(vec![0u8; 4]), tx);
        let weak = WeakHandle::new(Arc::clone(&cell));
        let recent = weak.recent();

        let clearance = cell.try_clear().unwrap();
        assert!(clearance.recently_used);
        assert!(!recent.is_alive());
        assert!(weak.is_cleared());
        assert!(weak.get().is_none());
    }

    #[test]
    fn test_clear_without_receiver() {
        let (tx, rx) = unbounded();
        drop(rx);
        let cell = PayloadCell::new(1, Payload::from_rows(vec![1]), tx);
        assert!(cell.try_clear().is_some());
    }
}
