//! Soak Workload
//!
//! Synthetic producer/consumer/reclaimer workload for exercising the cache
//! under concurrency.
//!
//! # Tasks
//!
//! - Producers cache tables, "flush" them after a delay, then clear them for
//!   reclaim; every Nth table is invalidated afterwards
//! - Consumers read published tables round-robin
//! - One reclaimer task applies bounded pressure on a fixed interval

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::{
    CacheEngine, CacheKey, CacheOccupancy, CacheStatistics, CachedBuffer, Pressure, ReclaimReport,
};
use crate::error::{Error, Result};

/// Soak workload configuration
#[derive(Debug, Clone)]
pub struct SoakConfig {
    /// Number of producer tasks
    pub producers: usize,
    /// Number of consumer tasks
    pub consumers: usize,
    /// Tables each producer creates
    pub tables_per_producer: usize,
    /// Rows per table
    pub rows_per_table: usize,
    /// Bytes per row
    pub row_bytes: usize,
    /// Delay between caching a table and it being persisted
    pub flush_delay: Duration,
    /// Invalidate every Nth table (0 = never)
    pub invalidate_every: usize,
    /// Interval between reclaim passes
    pub reclaim_interval: Duration,
    /// Tables cleared per reclaim pass
    pub reclaim_batch: usize,
}

impl Default for SoakConfig {
    fn default() -> Self {
        Self {
            producers: 2,
            consumers: 4,
            tables_per_producer: 200,
            rows_per_table: 64,
            row_bytes: 128,
            flush_delay: Duration::from_millis(5),
            invalidate_every: 10,
            reclaim_interval: Duration::from_millis(20),
            reclaim_batch: 8,
        }
    }
}

impl SoakConfig {
    /// Reject configurations that cannot make progress
    pub fn validate(&self) -> Result<()> {
        if self.producers == 0 {
            return Err(Error::InvalidArgument("producers must be at least 1".into()));
        }
        if self.reclaim_interval.is_zero() {
            return Err(Error::InvalidArgument(
                "reclaim interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// A buffer whose table is "flushed" by flipping a flag
pub struct SimulatedBuffer {
    key: CacheKey,
    persisted: AtomicBool,
}

impl SimulatedBuffer {
    /// Create an unpersisted buffer
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            key: CacheKey::new(label),
            persisted: AtomicBool::new(false),
        }
    }

    /// Record that the table reached durable storage
    pub fn mark_persisted(&self) {
        self.persisted.store(true, Ordering::Release);
    }
}

impl CachedBuffer for SimulatedBuffer {
    fn cache_key(&self) -> &CacheKey {
        &self.key
    }

    fn is_durably_persisted(&self) -> bool {
        self.persisted.load(Ordering::Acquire)
    }
}

/// Summary of a soak run
#[derive(Debug, Clone, Serialize)]
pub struct SoakReport {
    /// Tables cached by producers
    pub tables_produced: u64,
    /// Lookups issued by consumers
    pub lookups: u64,
    /// Tables cleared by the reclaimer task
    pub reclaimed: ReclaimReport,
    /// Final cache counters
    pub statistics: CacheStatistics,
    /// Final tier occupancy
    pub occupancy: CacheOccupancy,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}

type Directory = Arc<RwLock<Vec<CacheKey>>>;

/// Run the workload until `cancel` fires
pub async fn run(
    engine: Arc<CacheEngine<Bytes>>,
    config: SoakConfig,
    cancel: CancellationToken,
) -> Result<SoakReport> {
    config.validate()?;
    info!(
        producers = config.producers,
        consumers = config.consumers,
        tables_per_producer = config.tables_per_producer,
        "Starting soak workload"
    );

    let directory: Directory = Arc::new(RwLock::new(Vec::new()));
    let produced = Arc::new(AtomicU64::new(0));
    let lookups = Arc::new(AtomicU64::new(0));

    let producers: Vec<JoinHandle<()>> = (0..config.producers)
        .map(|p| {
            tokio::spawn(produce(
                p,
                Arc::clone(&engine),
                config.clone(),
                Arc::clone(&directory),
                Arc::clone(&produced),
                cancel.clone(),
            ))
        })
        .collect();

    let consumers: Vec<JoinHandle<()>> = (0..config.consumers)
        .map(|c| {
            tokio::spawn(consume(
                c,
                Arc::clone(&engine),
                Arc::clone(&directory),
                Arc::clone(&lookups),
                cancel.clone(),
            ))
        })
        .collect();

    let reclaimer = tokio::spawn(reclaim(Arc::clone(&engine), config.clone(), cancel.clone()));

    for handle in producers.into_iter().chain(consumers) {
        handle
            .await
            .map_err(|e| Error::Internal(format!("soak task failed: {}", e)))?;
    }
    let reclaimed = reclaimer
        .await
        .map_err(|e| Error::Internal(format!("reclaim task failed: {}", e)))?;

    Ok(SoakReport {
        tables_produced: produced.load(Ordering::Relaxed),
        lookups: lookups.load(Ordering::Relaxed),
        reclaimed,
        statistics: engine.statistics(),
        occupancy: engine.occupancy(),
        finished_at: Utc::now(),
    })
}

fn make_rows(rows: usize, row_bytes: usize, seed: usize) -> Vec<Bytes> {
    (0..rows)
        .map(|r| Bytes::from(vec![((seed + r) % 251) as u8; row_bytes]))
        .collect()
}

async fn produce(
    producer: usize,
    engine: Arc<CacheEngine<Bytes>>,
    config: SoakConfig,
    directory: Directory,
    produced: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    for table in 0..config.tables_per_producer {
        if cancel.is_cancelled() {
            break;
        }

        let buffer = SimulatedBuffer::new(format!("p{}-t{}", producer, table));
        let rows = make_rows(config.rows_per_table, config.row_bytes, table);
        engine.put(buffer.cache_key(), rows);
        directory.write().push(buffer.cache_key().clone());
        produced.fetch_add(1, Ordering::Relaxed);

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(config.flush_delay) => {}
        }
        buffer.mark_persisted();
        engine.clear_for_reclaim(&buffer);

        if config.invalidate_every > 0 && table % config.invalidate_every == config.invalidate_every - 1 {
            engine.invalidate(buffer.cache_key());
        }
    }
    debug!(producer, "Producer finished");
}

async fn consume(
    consumer: usize,
    engine: Arc<CacheEngine<Bytes>>,
    directory: Directory,
    lookups: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    let mut cursor = consumer;
    while !cancel.is_cancelled() {
        let key = {
            let keys = directory.read();
            if keys.is_empty() {
                None
            } else {
                Some(keys[cursor % keys.len()].clone())
            }
        };

        match key {
            Some(key) => {
                engine.get(&key);
                lookups.fetch_add(1, Ordering::Relaxed);
                cursor = cursor.wrapping_add(7);
                if cursor % 64 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            None => tokio::time::sleep(Duration::from_millis(1)).await,
        }
    }
    debug!(consumer, "Consumer finished");
}

async fn reclaim(
    engine: Arc<CacheEngine<Bytes>>,
    config: SoakConfig,
    cancel: CancellationToken,
) -> ReclaimReport {
    let reclaimer = engine.reclaimer();
    drop(engine);

    let mut total = ReclaimReport::default();
    let mut interval = tokio::time::interval(config.reclaim_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                total.merge(reclaimer.reclaim(Pressure::Bounded(config.reclaim_batch)));
            }
        }
    }
    total
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soak_config_validation() {
        assert!(SoakConfig::default().validate().is_ok());

        let config = SoakConfig {
            producers: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_simulated_buffer_persistence() {
        let buffer = SimulatedBuffer::new("b");
        assert!(!buffer.is_durably_persisted());
        buffer.mark_persisted();
        assert!(buffer.is_durably_persisted());
        assert_eq!(buffer.cache_key().label(), "b");
    }

    #[test]
    fn test_make_rows() {
        let rows = make_rows(3, 4, 250);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].as_ref(), &[250u8; 4]);
        assert_eq!(rows[1].as_ref(), &[0u8; 4]);
    }

    #[tokio::test]
    async fn test_short_soak_run() {
        let engine = Arc::new(CacheEngine::new());
        let config = SoakConfig {
            producers: 2,
            consumers: 2,
            tables_per_producer: 20,
            rows_per_table: 4,
            row_bytes: 8,
            flush_delay: Duration::from_millis(1),
            invalidate_every: 5,
            reclaim_interval: Duration::from_millis(5),
            reclaim_batch: 4,
        };
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            stopper.cancel();
        });

        let report = run(engine, config, cancel).await.unwrap();
        assert!(report.tables_produced > 0);
        assert_eq!(report.statistics.tables_cached, report.tables_produced);
        assert!(report.statistics.is_consistent());
        assert!(report.occupancy.recent <= 32);
    }
}
