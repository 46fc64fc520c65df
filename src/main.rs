//! Buffer Cache Soak Driver
//!
//! Runs producers, consumers and a memory reclaimer against one shared
//! `CacheEngine` and reports the final statistics.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        buffer-cache soak                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  Producers   │───▶│ CacheEngine  │◀───│  Consumers   │       │
//! │  │ put / flush  │    │              │    │     get      │       │
//! │  └──────────────┘    └──────▲───────┘    └──────────────┘       │
//! │                             │                                   │
//! │                      ┌──────┴───────┐                           │
//! │                      │  Reclaimer   │                           │
//! │                      └──────────────┘                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use buffer_cache::error::{Error, Result};
use buffer_cache::workload::{self, SoakConfig};
use buffer_cache::{CacheConfig, CacheEngine, CacheMetricsExporter};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Buffer Cache - soak the tiered table cache under concurrent load
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Optional YAML cache configuration file
    #[arg(long, env = "BUFFER_CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the number of recently used tables kept softly
    #[arg(long, env = "RECENCY_CAPACITY")]
    recency_capacity: Option<usize>,

    /// Override the statistics logging interval in seconds
    #[arg(long, env = "STATISTICS_INTERVAL_SECS")]
    statistics_interval_secs: Option<u64>,

    /// Producer tasks
    #[arg(long, env = "SOAK_PRODUCERS", default_value = "2")]
    producers: usize,

    /// Consumer tasks
    #[arg(long, env = "SOAK_CONSUMERS", default_value = "4")]
    consumers: usize,

    /// Tables created per producer
    #[arg(long, env = "SOAK_TABLES", default_value = "200")]
    tables: usize,

    /// Rows per table
    #[arg(long, env = "SOAK_ROWS", default_value = "64")]
    rows: usize,

    /// Bytes per row
    #[arg(long, env = "SOAK_ROW_BYTES", default_value = "128")]
    row_bytes: usize,

    /// Delay before a cached table counts as persisted
    #[arg(long, env = "SOAK_FLUSH_DELAY_MS", default_value = "5")]
    flush_delay_ms: u64,

    /// Invalidate every Nth table (0 disables)
    #[arg(long, env = "SOAK_INVALIDATE_EVERY", default_value = "10")]
    invalidate_every: usize,

    /// Interval between reclaim passes
    #[arg(long, env = "SOAK_RECLAIM_INTERVAL_MS", default_value = "20")]
    reclaim_interval_ms: u64,

    /// Tables cleared per reclaim pass
    #[arg(long, env = "SOAK_RECLAIM_BATCH", default_value = "8")]
    reclaim_batch: usize,

    /// Run duration in seconds
    #[arg(long, env = "SOAK_DURATION_SECS", default_value = "10")]
    duration_secs: u64,

    /// Print Prometheus metrics after the run
    #[arg(long, env = "SOAK_PROMETHEUS")]
    prometheus: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn cache_config(&self) -> Result<CacheConfig> {
        let mut config = match &self.config {
            Some(path) => CacheConfig::from_file(path)?,
            None => CacheConfig::default(),
        };
        if let Some(capacity) = self.recency_capacity {
            config.recency_capacity = capacity;
        }
        if let Some(secs) = self.statistics_interval_secs {
            config.statistics_interval_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }

    fn soak_config(&self) -> SoakConfig {
        SoakConfig {
            producers: self.producers,
            consumers: self.consumers,
            tables_per_producer: self.tables,
            rows_per_table: self.rows,
            row_bytes: self.row_bytes,
            flush_delay: Duration::from_millis(self.flush_delay_ms),
            invalidate_every: self.invalidate_every,
            reclaim_interval: Duration::from_millis(self.reclaim_interval_ms),
            reclaim_batch: self.reclaim_batch,
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let cache_config = args.cache_config()?;
    let soak_config = args.soak_config();

    info!("Starting buffer cache soak");
    info!("  Recency capacity: {}", cache_config.recency_capacity);
    info!(
        "  Statistics interval: {} seconds",
        cache_config.statistics_interval_secs
    );
    info!(
        "  Producers: {}, consumers: {}",
        soak_config.producers, soak_config.consumers
    );
    info!("  Duration: {} seconds", args.duration_secs);

    let engine = Arc::new(CacheEngine::with_config(cache_config)?);
    let cancel = CancellationToken::new();

    let stopper = cancel.clone();
    let duration = Duration::from_secs(args.duration_secs);
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {
                info!("Soak duration elapsed");
            }
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => warn!("Interrupted, stopping soak"),
                    Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
                }
            }
        }
        stopper.cancel();
    });

    let report = workload::run(Arc::clone(&engine), soak_config, cancel).await?;

    info!(
        tables = report.tables_produced,
        lookups = report.lookups,
        reclaimed = report.reclaimed.total(),
        hit_ratio = report.statistics.hit_ratio(),
        "Soak complete"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    if args.prometheus {
        let exporter = CacheMetricsExporter::new()?;
        exporter.observe(&report.statistics, &report.occupancy);
        print!("{}", exporter.encode_text()?);
    }

    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => {
            return Err(Error::InvalidArgument(format!(
                "unknown log level: {}",
                other
            )))
        }
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let result = if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    };
    result.map_err(|e| Error::Internal(format!("Failed to initialize logging: {}", e)))
}
