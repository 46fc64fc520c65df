//! Prometheus Exporter
//!
//! Mirrors cache statistics snapshots into a Prometheus registry. Counters
//! advance by the delta since the previous observation.

use parking_lot::Mutex;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::cache::{AccessOutcome, CacheOccupancy, CacheStatistics};
use crate::error::{Error, Result};

const OUTCOMES: [AccessOutcome; 4] = [
    AccessOutcome::HardHit,
    AccessOutcome::SoftHit,
    AccessOutcome::WeakHit,
    AccessOutcome::Miss,
];

/// Cache metrics registered on a Prometheus registry
pub struct CacheMetricsExporter {
    registry: Registry,
    tables_cached: IntCounter,
    tables_reclaimed: IntCounter,
    rows_reclaimed: IntCounter,
    accesses: IntCounterVec,
    entries: IntGauge,
    strong_entries: IntGauge,
    recent_entries: IntGauge,
    last: Mutex<CacheStatistics>,
}

impl CacheMetricsExporter {
    /// Create an exporter with its own registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create an exporter registering on `registry`
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let tables_cached = IntCounter::new(
            "buffer_cache_tables_cached_total",
            "Tables put into the buffer cache",
        )?;
        let tables_reclaimed = IntCounter::new(
            "buffer_cache_tables_reclaimed_total",
            "Tables cleared by the memory reclaimer",
        )?;
        let rows_reclaimed = IntCounter::new(
            "buffer_cache_rows_reclaimed_total",
            "Rows freed by the memory reclaimer",
        )?;
        let accesses = IntCounterVec::new(
            Opts::new(
                "buffer_cache_accesses_total",
                "Buffer cache lookups by outcome",
            ),
            &["outcome"],
        )?;
        let entries = IntGauge::new(
            "buffer_cache_entries",
            "Cached tables not yet reclaimed",
        )?;
        let strong_entries = IntGauge::new(
            "buffer_cache_strong_entries",
            "Cached tables pinned until persisted",
        )?;
        let recent_entries = IntGauge::new(
            "buffer_cache_recent_entries",
            "Cached tables holding a recent handle",
        )?;

        registry.register(Box::new(tables_cached.clone()))?;
        registry.register(Box::new(tables_reclaimed.clone()))?;
        registry.register(Box::new(rows_reclaimed.clone()))?;
        registry.register(Box::new(accesses.clone()))?;
        registry.register(Box::new(entries.clone()))?;
        registry.register(Box::new(strong_entries.clone()))?;
        registry.register(Box::new(recent_entries.clone()))?;

        Ok(Self {
            registry,
            tables_cached,
            tables_reclaimed,
            rows_reclaimed,
            accesses,
            entries,
            strong_entries,
            recent_entries,
            last: Mutex::new(CacheStatistics::default()),
        })
    }

    /// Update metrics from a statistics snapshot and current occupancy
    pub fn observe(&self, stats: &CacheStatistics, occupancy: &CacheOccupancy) {
        let mut last = self.last.lock();

        self.tables_cached
            .inc_by(stats.tables_cached.saturating_sub(last.tables_cached));
        self.tables_reclaimed
            .inc_by(stats.tables_reclaimed.saturating_sub(last.tables_reclaimed));
        self.rows_reclaimed
            .inc_by(stats.rows_reclaimed.saturating_sub(last.rows_reclaimed));
        for outcome in OUTCOMES {
            let delta = stats.count(outcome).saturating_sub(last.count(outcome));
            self.accesses
                .with_label_values(&[outcome.label()])
                .inc_by(delta);
        }

        self.entries.set(occupancy.entries as i64);
        self.strong_entries.set(occupancy.strong as i64);
        self.recent_entries.set(occupancy.recent as i64);

        *last = *stats;
    }

    /// Get the underlying registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics not UTF-8: {}", e)))
    }
}

// =============================================================================
// Tests
// =============================================================================
