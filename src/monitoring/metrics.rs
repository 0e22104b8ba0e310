use prometheus::{Gauge, IntGauge, Opts, Registry};
use std::sync::Arc;
use tracing::error;

use crate::cache::CacheStatistics;
use crate::db::connection::PoolStats;
use crate::monitoring::performance::{PerformanceMetrics, PerformanceSnapshot};

/// Prometheus exporter for the resilience layer.
///
/// The in-process monitors stay the source of truth; this collector mirrors
/// their snapshots into registered gauges right before each scrape, so the
/// `_total` series reset together with the performance window.
pub struct MetricsCollector {
    registry: Arc<Registry>,

    // Query metrics
    pub db_queries_total: IntGauge,
    pub db_query_errors_total: IntGauge,
    pub db_slow_queries_total: IntGauge,
    pub db_query_avg_duration_ms: Gauge,
    pub db_queries_per_second: Gauge,

    // Connection pool metrics
    pub db_connections_active: IntGauge,
    pub db_connections_idle: IntGauge,
    pub db_connections_max: IntGauge,
    pub db_pool_utilization_percent: Gauge,

    // Cache metrics
    pub cache_entries: IntGauge,
    pub cache_size_bytes: IntGauge,
    pub cache_expired_entries: IntGauge,
    pub cache_hits_total: IntGauge,
    pub cache_misses_total: IntGauge,
    pub cache_evictions_total: IntGauge,
    pub cache_hit_ratio: Gauge,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Arc::new(Registry::new());

        let db_queries_total = IntGauge::with_opts(Opts::new(
            "db_queries_total",
            "Queries executed in the current metrics window",
        ))?;
        registry.register(Box::new(db_queries_total.clone()))?;

        let db_query_errors_total = IntGauge::with_opts(Opts::new(
            "db_query_errors_total",
            "Failed query attempts in the current metrics window",
        ))?;
        registry.register(Box::new(db_query_errors_total.clone()))?;

        let db_slow_queries_total = IntGauge::with_opts(Opts::new(
            "db_slow_queries_total",
            "Queries over the slow threshold in the current metrics window",
        ))?;
        registry.register(Box::new(db_slow_queries_total.clone()))?;

        let db_query_avg_duration_ms = Gauge::with_opts(Opts::new(
            "db_query_avg_duration_ms",
            "Average query duration in milliseconds",
        ))?;
        registry.register(Box::new(db_query_avg_duration_ms.clone()))?;

        let db_queries_per_second = Gauge::with_opts(Opts::new(
            "db_queries_per_second",
            "Query throughput over the current metrics window",
        ))?;
        registry.register(Box::new(db_queries_per_second.clone()))?;

        let db_connections_active = IntGauge::with_opts(Opts::new(
            "db_connections_active",
            "Number of active database connections",
        ))?;
        registry.register(Box::new(db_connections_active.clone()))?;

        let db_connections_idle = IntGauge::with_opts(Opts::new(
            "db_connections_idle",
            "Number of idle database connections",
        ))?;
        registry.register(Box::new(db_connections_idle.clone()))?;

        let db_connections_max = IntGauge::with_opts(Opts::new(
            "db_connections_max",
            "Maximum number of database connections",
        ))?;
        registry.register(Box::new(db_connections_max.clone()))?;

        let db_pool_utilization_percent = Gauge::with_opts(Opts::new(
            "db_pool_utilization_percent",
            "Share of the connection pool in use",
        ))?;
        registry.register(Box::new(db_pool_utilization_percent.clone()))?;

        let cache_entries = IntGauge::with_opts(Opts::new(
            "cache_entries",
            "Entries resident in the response cache",
        ))?;
        registry.register(Box::new(cache_entries.clone()))?;

        let cache_size_bytes = IntGauge::with_opts(Opts::new(
            "cache_size_bytes",
            "Serialized size of all cached payloads",
        ))?;
        registry.register(Box::new(cache_size_bytes.clone()))?;

        let cache_expired_entries = IntGauge::with_opts(Opts::new(
            "cache_expired_entries",
            "Resident entries already past their expiry",
        ))?;
        registry.register(Box::new(cache_expired_entries.clone()))?;

        let cache_hits_total = IntGauge::with_opts(Opts::new(
            "cache_hits_total",
            "Cache lookups answered from memory",
        ))?;
        registry.register(Box::new(cache_hits_total.clone()))?;

        let cache_misses_total = IntGauge::with_opts(Opts::new(
            "cache_misses_total",
            "Cache lookups that fell through",
        ))?;
        registry.register(Box::new(cache_misses_total.clone()))?;

        let cache_evictions_total = IntGauge::with_opts(Opts::new(
            "cache_evictions_total",
            "Entries evicted by the capacity bound",
        ))?;
        registry.register(Box::new(cache_evictions_total.clone()))?;

        let cache_hit_ratio = Gauge::with_opts(Opts::new(
            "cache_hit_ratio",
            "Hits as a share of all cache lookups",
        ))?;
        registry.register(Box::new(cache_hit_ratio.clone()))?;

        Ok(Self {
            registry,
            db_queries_total,
            db_query_errors_total,
            db_slow_queries_total,
            db_query_avg_duration_ms,
            db_queries_per_second,
            db_connections_active,
            db_connections_idle,
            db_connections_max,
            db_pool_utilization_percent,
            cache_entries,
            cache_size_bytes,
            cache_expired_entries,
            cache_hits_total,
            cache_misses_total,
            cache_evictions_total,
            cache_hit_ratio,
        })
    }

    pub fn update_query_metrics(
        &self,
        snapshot: &PerformanceSnapshot,
        metrics: &PerformanceMetrics,
    ) {
        self.db_queries_total.set(snapshot.query_count as i64);
        self.db_query_errors_total.set(snapshot.error_count as i64);
        self.db_slow_queries_total
            .set(snapshot.slow_query_count as i64);
        self.db_query_avg_duration_ms
            .set(metrics.average_query_time_ms);
        self.db_queries_per_second.set(metrics.queries_per_second);
    }

    pub fn update_pool_metrics(&self, stats: Option<&PoolStats>) {
        match stats {
            Some(stats) => {
                self.db_connections_active.set(stats.active as i64);
                self.db_connections_idle.set(stats.idle as i64);
                self.db_connections_max.set(stats.max_size as i64);
                self.db_pool_utilization_percent
                    .set(stats.utilization_percentage() as f64);
            }
            None => {
                self.db_connections_active.set(0);
                self.db_connections_idle.set(0);
                self.db_connections_max.set(0);
                self.db_pool_utilization_percent.set(0.0);
            }
        }
    }

    pub fn update_cache_metrics(&self, stats: &CacheStatistics) {
        self.cache_entries.set(stats.total_entries as i64);
        self.cache_size_bytes.set(stats.total_size_bytes as i64);
        self.cache_expired_entries.set(stats.expired_count as i64);
        self.cache_hits_total.set(stats.hits as i64);
        self.cache_misses_total.set(stats.misses as i64);
        self.cache_evictions_total.set(stats.evicted_total as i64);
        self.cache_hit_ratio.set(stats.hit_ratio);
    }

    /// Export all metrics in Prometheus text format
    pub fn gather_metrics(&self) -> String {
        use prometheus::TextEncoder;
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_else(|e| {
                error!("Failed to encode metrics: {}", e);
                String::new()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_registers_without_conflicts() {
        let collector = MetricsCollector::new().unwrap();
        assert_eq!(collector.db_queries_total.get(), 0);
        assert_eq!(collector.cache_entries.get(), 0);
    }

    #[test]
    fn gather_includes_registered_series() {
        let collector = MetricsCollector::new().unwrap();
        collector.db_queries_total.set(42);
        collector.cache_hit_ratio.set(0.75);

        let output = collector.gather_metrics();
        assert!(output.contains("db_queries_total 42"));
        assert!(output.contains("cache_hit_ratio 0.75"));
        assert!(output.contains("db_pool_utilization_percent"));
    }

    #[test]
    fn pool_metrics_reset_when_disconnected() {
        let collector = MetricsCollector::new().unwrap();
        let stats = PoolStats {
            size: 10,
            idle: 4,
            active: 6,
            max_size: 20,
        };
        collector.update_pool_metrics(Some(&stats));
        assert_eq!(collector.db_connections_active.get(), 6);

        collector.update_pool_metrics(None);
        assert_eq!(collector.db_connections_active.get(), 0);
        assert_eq!(collector.db_connections_max.get(), 0);
    }
}
