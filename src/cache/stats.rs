//! Cache Statistics
//!
//! Cumulative effectiveness counters, updated under the engine lock, and a
//! rate-limited statistics event on the `buffer_cache::stats` target.

use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::handle::Clearance;

/// Default minimum time between two statistics events (5 minutes)
pub const DEFAULT_STATISTICS_INTERVAL: Duration = Duration::from_secs(300);

/// Classification of one lookup, by the strongest tier the table was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessOutcome {
    /// Found under a strong handle
    HardHit,
    /// Found under a recent handle
    SoftHit,
    /// Found only through the weak handle
    WeakHit,
    /// Not cached, invalidated, or reclaimed
    Miss,
}

impl AccessOutcome {
    /// True for any kind of hit
    pub fn is_hit(&self) -> bool {
        !matches!(self, AccessOutcome::Miss)
    }

    /// Short label used in metrics
    pub fn label(&self) -> &'static str {
        match self {
            AccessOutcome::HardHit => "hard",
            AccessOutcome::SoftHit => "soft",
            AccessOutcome::WeakHit => "weak",
            AccessOutcome::Miss => "miss",
        }
    }
}

/// Snapshot of all cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Tables ever put into the cache
    pub tables_cached: u64,
    /// Tables cleared by the reclaimer
    pub tables_reclaimed: u64,
    /// Reclaimed tables that still held a recent handle
    pub recent_reclaimed: u64,
    /// Rows freed across all reclaimed tables
    pub rows_reclaimed: u64,
    /// Non-silent lookups
    pub accesses: u64,
    /// Lookups served under a strong handle
    pub hard_hits: u64,
    /// Lookups served under a recent handle
    pub soft_hits: u64,
    /// Lookups served through the weak handle alone
    pub weak_hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
}

impl CacheStatistics {
    /// Hits of any kind
    pub fn hits(&self) -> u64 {
        self.hard_hits + self.soft_hits + self.weak_hits
    }

    /// Hit ratio (0.0 - 1.0)
    pub fn hit_ratio(&self) -> f64 {
        if self.accesses == 0 {
            0.0
        } else {
            self.hits() as f64 / self.accesses as f64
        }
    }

    /// Every access is counted in exactly one category
    pub fn is_consistent(&self) -> bool {
        self.accesses == self.hits() + self.misses
    }

    /// Counter for a single outcome
    pub fn count(&self, outcome: AccessOutcome) -> u64 {
        match outcome {
            AccessOutcome::HardHit => self.hard_hits,
            AccessOutcome::SoftHit => self.soft_hits,
            AccessOutcome::WeakHit => self.weak_hits,
            AccessOutcome::Miss => self.misses,
        }
    }
}

pub(crate) struct StatisticsRecorder {
    counters: CacheStatistics,
    clearances: Receiver<Clearance>,
    interval: Duration,
    last_emission: Instant,
}

impl StatisticsRecorder {
    pub(crate) fn new(clearances: Receiver<Clearance>, interval: Duration) -> Self {
        Self {
            counters: CacheStatistics::default(),
            clearances,
            interval,
            last_emission: Instant::now(),
        }
    }

    pub(crate) fn record_put(&mut self) {
        self.counters.tables_cached += 1;
    }

    /// Count one lookup, then drain clearances and emit if the interval passed
    pub(crate) fn record_access(
        &mut self,
        outcome: AccessOutcome,
        now: Instant,
    ) -> Option<CacheStatistics> {
        self.counters.accesses += 1;
        match outcome {
            AccessOutcome::HardHit => self.counters.hard_hits += 1,
            AccessOutcome::SoftHit => self.counters.soft_hits += 1,
            AccessOutcome::WeakHit => self.counters.weak_hits += 1,
            AccessOutcome::Miss => self.counters.misses += 1,
        }
        self.drain_clearances();
        self.maybe_emit(now)
    }

    /// Count pending reclaim notifications; returns how many were drained
    pub(crate) fn drain_clearances(&mut self) -> u64 {
        let mut drained = 0;
        for clearance in self.clearances.try_iter() {
            drained += 1;
            self.counters.rows_reclaimed += clearance.rows as u64;
            if clearance.recently_used {
                self.counters.recent_reclaimed += 1;
            }
        }
        self.counters.tables_reclaimed += drained;
        drained
    }

    pub(crate) fn snapshot(&mut self) -> CacheStatistics {
        self.drain_clearances();
        self.counters
    }

    fn maybe_emit(&mut self, now: Instant) -> Option<CacheStatistics> {
        if now.saturating_duration_since(self.last_emission) < self.interval {
            return None;
        }
        self.last_emission = now;

        let stats = self.counters;
        debug_assert!(stats.is_consistent(), "access counters out of balance");
        debug!(
            target: "buffer_cache::stats",
            tables_cached = stats.tables_cached,
            tables_reclaimed = stats.tables_reclaimed,
            rows_reclaimed = stats.rows_reclaimed,
            accesses = stats.accesses,
            hard_hits = stats.hard_hits,
            soft_hits = stats.soft_hits,
            weak_hits = stats.weak_hits,
            misses = stats.misses,
            "Buffer cache statistics"
        );
        Some(stats)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    fn clearance(key_id: u64) -> Clearance {
        Clearance {
            key_id,
            rows: key_id as usize * 10,
            recently_used: key_id % 2 == 0,
        }
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(AccessOutcome::HardHit.label(), "hard");
        assert_eq!(AccessOutcome::Miss.label(), "miss");
        assert!(AccessOutcome::WeakHit.is_hit());
        assert!(!AccessOutcome::Miss.is_hit());
    }

    #[test]
    fn test_access_counting() {
        let (_tx, rx) = unbounded();
        let mut recorder = StatisticsRecorder::new(rx, DEFAULT_STATISTICS_INTERVAL);
        let now = Instant::now();

        recorder.record_put();
        recorder.record_access(AccessOutcome::HardHit, now);
        recorder.record_access(AccessOutcome::HardHit, now);
        recorder.record_access(AccessOutcome::SoftHit, now);
        recorder.record_access(AccessOutcome::WeakHit, now);
        recorder.record_access(AccessOutcome::Miss, now);

        let stats = recorder.snapshot();
        assert_eq!(stats.tables_cached, 1);
        assert_eq!(stats.accesses, 5);
        assert_eq!(stats.count(AccessOutcome::HardHit), 2);
        assert_eq!(stats.soft_hits, 1);
        assert_eq!(stats.weak_hits, 1);
        assert_eq!(stats.misses, 1);
        assert!(stats.is_consistent());
        assert!((stats.hit_ratio() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_clearances_drained_into_reclaimed() {
        let (tx, rx) = unbounded();
        let mut recorder = StatisticsRecorder::new(rx, DEFAULT_STATISTICS_INTERVAL);

        tx.send(clearance(1)).unwrap();
        tx.send(clearance(2)).unwrap();
        recorder.record_access(AccessOutcome::Miss, Instant::now());
        assert_eq!(recorder.snapshot().tables_reclaimed, 2);

        tx.send(clearance(3)).unwrap();
        assert_eq!(recorder.drain_clearances(), 1);
        let stats = recorder.snapshot();
        assert_eq!(stats.tables_reclaimed, 3);
        assert_eq!(stats.rows_reclaimed, 60);
        assert_eq!(stats.recent_reclaimed, 1);
    }

    #[test]
    fn test_emission_is_rate_limited() {
        let (_tx, rx) = unbounded();
        let interval = Duration::from_secs(300);
        let mut recorder = StatisticsRecorder::new(rx, interval);
        let start = recorder.last_emission;

        assert!(recorder
            .record_access(AccessOutcome::HardHit, start + Duration::from_secs(10))
            .is_none());

        let emitted = recorder
            .record_access(AccessOutcome::Miss, start + interval)
            .expect("interval elapsed");
        assert_eq!(emitted.accesses, 2);

        // Timer restarts at the emission, counters do not
        assert!(recorder
            .record_access(AccessOutcome::Miss, start + interval + Duration::from_secs(299))
            .is_none());
        let emitted = recorder
            .record_access(AccessOutcome::Miss, start + interval * 2)
            .expect("second interval elapsed");
        assert_eq!(emitted.accesses, 4);
        assert_eq!(emitted.misses, 3);
    }

    #[test]
    fn test_statistics_serialize() {
        let stats = CacheStatistics {
            tables_cached: 2,
            accesses: 1,
            hard_hits: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["tables_cached"], 2);
        assert_eq!(json["hard_hits"], 1);
        assert_eq!(json["misses"], 0);
    }
}
