//! Cache Entry Types
//!
//! Key identity, immutable table payloads, and the buffer collaborator
//! contract.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::channel::Sender;
use parking_lot::Mutex;

/// Source of process-unique key ids. Ids are never reused.
static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct KeyIdentity {
    id: u64,
    label: String,
    /// Orphan queues of the engines caching a table under this key
    watchers: Mutex<Vec<Sender<u64>>>,
}

impl Drop for KeyIdentity {
    fn drop(&mut self) {
        for watcher in self.watchers.get_mut().drain(..) {
            // A dropped engine has nothing left to expunge.
            let _ = watcher.send(self.id);
        }
    }
}

/// Identity of a cached table
///
/// Keys compare by identity: two keys created separately are distinct even
/// when their labels match, while clones of one key are equal. The cache only
/// holds a weak reference to the key, so an entry whose owners have all
/// dropped their clones becomes an orphan and is swept.
#[derive(Clone)]
pub struct CacheKey {
    inner: Arc<KeyIdentity>,
}

impl CacheKey {
    /// Create a new key with a fresh identity
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(KeyIdentity {
                id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
                label: label.into(),
                watchers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Process-unique id of this key
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Label supplied at creation (not part of identity)
    #[inline]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Post this key's id on `orphans` once its last owner drops it
    pub(crate) fn watch(&self, orphans: &Sender<u64>) {
        let mut watchers = self.inner.watchers.lock();
        if !watchers.iter().any(|w| w.same_channel(orphans)) {
            watchers.push(orphans.clone());
        }
    }

    pub(crate) fn downgrade(&self) -> WeakKey {
        WeakKey {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheKey")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .finish()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.inner.label, self.inner.id)
    }
}

/// Non-owning reference to a key, held by the store
#[derive(Debug, Clone)]
pub(crate) struct WeakKey {
    id: u64,
    inner: Weak<KeyIdentity>,
}

impl WeakKey {
    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// True once every owning clone of the key has been dropped
    #[inline]
    pub(crate) fn is_orphaned(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

/// Immutable, shareable table of rows
///
/// Cloning is cheap and every clone views the same rows. Holding a clone
/// keeps the rows alive, which also keeps the reclaimer from clearing them.
pub struct Payload<R> {
    rows: Arc<[R]>,
}

impl<R> Payload<R> {
    pub(crate) fn from_rows(rows: Vec<R>) -> Self {
        Self { rows: rows.into() }
    }

    /// Rows of the table
    #[inline]
    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    /// True if both payloads view the same stored table
    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.rows, &b.rows)
    }

    /// Number of live references to the rows, including this one
    #[inline]
    pub(crate) fn holders(&self) -> usize {
        Arc::strong_count(&self.rows)
    }
}

impl<R> Clone for Payload<R> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
        }
    }
}

impl<R> Deref for Payload<R> {
    type Target = [R];

    fn deref(&self) -> &[R] {
        &self.rows
    }
}

impl<R> fmt::Debug for Payload<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("rows", &self.rows.len())
            .finish()
    }
}

/// The buffer that owns a cached table and its on-disk copy
pub trait CachedBuffer {
    /// Key under which the buffer's table is cached
    fn cache_key(&self) -> &CacheKey;

    /// True once the table has been durably written to storage
    fn is_durably_persisted(&self) -> bool;
}

/// Strongest retention currently protecting an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RetentionTier {
    /// Not cached, invalidated, or reclaimed
    Absent,
    /// Reclaimable at any time
    Weak,
    /// Reclaimable, but recently used
    Recent,
    /// Pinned until cleared for reclaim
    Strong,
}

impl fmt::Display for RetentionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionTier::Absent => write!(f, "absent"),
            RetentionTier::Weak => write!(f, "weak"),
            RetentionTier::Recent => write!(f, "recent"),
            RetentionTier::Strong => write!(f, "strong"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_cache_key_identity() {
        let a = CacheKey::new("table");
        let b = CacheKey::new("table");

        assert_ne!(a, b, "separately created keys must be distinct");
        assert_eq!(a, a.clone());
        assert_eq!(a.label(), "table");
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_cache_key_hashing() {
        let a = CacheKey::new("x");
        let b = CacheKey::new("x");

        let mut set = HashSet::new();
        set.insert(a.clone());
        set.insert(a.clone());
        set.insert(b);

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_cache_key_display() {
        let key = CacheKey::new("buffer-7");
        assert_eq!(key.to_string(), format!("buffer-7#{}", key.id()));
    }

    #[test]
    fn test_weak_key_orphaned_after_last_clone() {
        let key = CacheKey::new("owner");
        let clone = key.clone();
        let weak = key.downgrade();

        assert_eq!(weak.id(), key.id());
        drop(key);
        assert!(!weak.is_orphaned());
        drop(clone);
        assert!(weak.is_orphaned());
    }

    #[test]
    fn test_watchers_notified_on_last_drop() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let key = CacheKey::new("watched");
        let id = key.id();
        key.watch(&tx);
        key.watch(&tx);

        let clone = key.clone();
        drop(key);
        assert!(rx.try_recv().is_err());

        drop(clone);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![id]);
    }

    #[test]
    fn test_payload_is_shared_view() {
        let payload = Payload::from_rows(vec![1, 2, 3]);
        let clone = payload.clone();

        assert_eq!(&*payload, &[1, 2, 3]);
        assert_eq!(clone.rows().len(), 3);
        assert!(Payload::ptr_eq(&payload, &clone));
        assert_eq!(payload.holders(), 2);

        drop(clone);
        assert_eq!(payload.holders(), 1);
    }

    #[test]
    fn test_payload_identity_differs_for_equal_rows() {
        let a = Payload::from_rows(vec!["row"]);
        let b = Payload::from_rows(vec!["row"]);
        assert!(!Payload::ptr_eq(&a, &b));
    }

    #[test]
    fn test_retention_tier_ordering() {
        assert!(RetentionTier::Strong > RetentionTier::Recent);
        assert!(RetentionTier::Recent > RetentionTier::Weak);
        assert!(RetentionTier::Weak > RetentionTier::Absent);
        assert_eq!(RetentionTier::Recent.to_string(), "recent");
    }
}
