//! Buffer Cache - Tiered In-Memory Table Cache
//!
//! Caches the row payloads of tables owned by buffers, keyed by buffer
//! identity. Each table is held at one of three retention strengths; a table
//! is never reclaimable before its buffer reports it persisted.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          CacheEngine                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    Strong    │───▶│    Recent    │───▶│     Weak     │       │
//! │  │  (pinned)    │    │  (LRU of K)  │    │  (reclaim-   │       │
//! │  │              │    │              │    │   able)      │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//!                               ▲
//!                               │ Reclaimer (memory pressure)
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tier store, recency index, reclaimer and statistics
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus export of cache statistics
//! - [`workload`] - Concurrent soak workload used by the `buffer-cache` binary

pub mod cache;
pub mod error;
pub mod metrics;
pub mod workload;

// Re-export commonly used types
pub use cache::{
    CacheConfig, CacheEngine, CacheKey, CacheLookup, CacheStatistics, CachedBuffer, Payload,
    Pressure, Reclaimer, RetentionTier,
};
pub use error::{Error, Result};
pub use metrics::CacheMetricsExporter;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
