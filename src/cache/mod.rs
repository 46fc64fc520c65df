//! Tiered Table Cache
//!
//! Decides, per cached table, how strongly to keep it in memory, without ever
//! letting a table disappear before it has been persisted.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                         CacheEngine (one lock)                           │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  ReferenceTierStore      │ BoundedRecencyIndex   │ StatisticsRecorder    │
//! │  ┌────────────────────┐  │ ┌─────────────────┐   │ ┌─────────────────┐   │
//! │  │ strong  (pinned)   │  │ │ K most recently │   │ │ hit/miss counts │   │
//! │  │ recent  (≤ K)      │◄─┼─┤ touched keys    │   │ │ reclaim queue   │   │
//! │  │ weak    (always)   │  │ └─────────────────┘   │ └────────▲────────┘   │
//! │  └─────────┬──────────┘  │                       │          │            │
//! └────────────┼─────────────┴───────────────────────┴──────────┼────────────┘
//!              │ PayloadCell                          Clearance │
//!              ▼                                                │
//!         ┌──────────────────────────────────────────────────────┴─┐
//!         │ Reclaimer (external memory manager, no engine lock)    │
//!         └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! - `put`: strong + recent + weak
//! - `clear_for_reclaim`: recent + weak
//! - recency overflow: weak only (a later hit restores recent)
//! - `invalidate`, or lookup after the reclaimer cleared it: gone

mod engine;
mod entry;
mod handle;
mod reclaim;
mod recency;
mod stats;
mod store;

#[cfg(test)]
mod proptest;

pub use engine::{CacheConfig, CacheEngine, CacheLookup};
pub use entry::{CacheKey, CachedBuffer, Payload, RetentionTier};
pub use reclaim::{Pressure, ReclaimReport, Reclaimer};
pub use recency::{BoundedRecencyIndex, DEFAULT_RECENCY_CAPACITY};
pub use stats::{AccessOutcome, CacheStatistics, DEFAULT_STATISTICS_INTERVAL};
pub use store::CacheOccupancy;

// =============================================================================
// Tests
// =============================================================================
