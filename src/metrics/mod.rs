//! Metrics module
//!
//! Exposes buffer cache statistics to Prometheus.

mod exporter;

pub use exporter::CacheMetricsExporter;
