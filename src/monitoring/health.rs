use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::{CheckStatus, DatabaseHealthReport, HealthCheckResult};
use crate::cache::CacheStore;
use crate::db::connection::ConnectionManager;
use crate::monitoring::performance::PerformanceMonitor;

/// Index checks are skipped below this many combined scans; planner
/// statistics mean nothing on an idle database.
const MIN_SCANS_FOR_INDEX_CHECK: i64 = 100;

#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub connectivity_warning_ms: u64,
    pub connectivity_critical_ms: u64,
    pub query_latency_warning_ms: f64,
    pub query_latency_critical_ms: f64,
    pub pool_warning_percent: f64,
    pub pool_critical_percent: f64,
    pub storage_warning_bytes: u64,
    pub storage_critical_bytes: u64,
    pub index_usage_warning_percent: f64,
    pub slow_query_warning_percent: f64,
    pub slow_query_critical_percent: f64,
    pub cache_expired_warning_percent: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            connectivity_warning_ms: 1000, // 1 second
            connectivity_critical_ms: 5000,
            query_latency_warning_ms: 500.0,
            query_latency_critical_ms: 2000.0,
            pool_warning_percent: 70.0,
            pool_critical_percent: 90.0,
            storage_warning_bytes: 10 * 1024 * 1024 * 1024, // 10 GiB
            storage_critical_bytes: 50 * 1024 * 1024 * 1024,
            index_usage_warning_percent: 50.0,
            slow_query_warning_percent: 10.0,
            slow_query_critical_percent: 25.0,
            cache_expired_warning_percent: 50.0,
        }
    }
}

impl HealthThresholds {
    pub fn grade_connectivity(&self, latency_ms: u64) -> CheckStatus {
        if latency_ms > self.connectivity_critical_ms {
            CheckStatus::Critical
        } else if latency_ms > self.connectivity_warning_ms {
            CheckStatus::Warning
        } else {
            CheckStatus::Healthy
        }
    }

    pub fn grade_query_latency(&self, average_ms: f64) -> CheckStatus {
        if average_ms > self.query_latency_critical_ms {
            CheckStatus::Critical
        } else if average_ms > self.query_latency_warning_ms {
            CheckStatus::Warning
        } else {
            CheckStatus::Healthy
        }
    }

    pub fn grade_pool_utilization(&self, percent: f64) -> CheckStatus {
        if percent > self.pool_critical_percent {
            CheckStatus::Critical
        } else if percent > self.pool_warning_percent {
            CheckStatus::Warning
        } else {
            CheckStatus::Healthy
        }
    }

    pub fn grade_storage(&self, bytes: u64) -> CheckStatus {
        if bytes > self.storage_critical_bytes {
            CheckStatus::Critical
        } else if bytes > self.storage_warning_bytes {
            CheckStatus::Warning
        } else {
            CheckStatus::Healthy
        }
    }

    pub fn grade_index_usage(&self, percent: f64) -> CheckStatus {
        if percent < self.index_usage_warning_percent {
            CheckStatus::Warning
        } else {
            CheckStatus::Healthy
        }
    }

    pub fn grade_slow_queries(&self, percent: f64) -> CheckStatus {
        if percent > self.slow_query_critical_percent {
            CheckStatus::Critical
        } else if percent > self.slow_query_warning_percent {
            CheckStatus::Warning
        } else {
            CheckStatus::Healthy
        }
    }

    pub fn grade_expired_ratio(&self, percent: f64) -> CheckStatus {
        if percent > self.cache_expired_warning_percent {
            CheckStatus::Warning
        } else {
            CheckStatus::Healthy
        }
    }
}

/// Runs the diagnostic battery over the connection, the performance window
/// and the cache, and folds the outcomes into one report.
///
/// The reporter only reads from the components it polls. A probe that fails
/// becomes that check's result; `report` itself never fails.
#[derive(Clone)]
pub struct HealthReporter {
    connection: Arc<ConnectionManager>,
    performance: Arc<PerformanceMonitor>,
    cache: Arc<CacheStore>,
    thresholds: HealthThresholds,
}

impl HealthReporter {
    pub fn new(
        connection: Arc<ConnectionManager>,
        performance: Arc<PerformanceMonitor>,
        cache: Arc<CacheStore>,
    ) -> Self {
        Self {
            connection,
            performance,
            cache,
            thresholds: HealthThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Runs all checks concurrently and aggregates to the worst observed
    /// status.
    pub async fn report(&self) -> DatabaseHealthReport {
        let started = Instant::now();
        let (
            connectivity,
            query_latency,
            storage_footprint,
            index_utilization,
            connection_saturation,
            slow_queries,
            cache_health,
        ) = tokio::join!(
            self.check_connectivity(),
            self.check_query_latency(),
            self.check_storage_footprint(),
            self.check_index_utilization(),
            self.check_connection_saturation(),
            self.check_slow_queries(),
            self.check_cache_health(),
        );

        let mut checks = HashMap::new();
        checks.insert("connectivity".to_string(), connectivity);
        checks.insert("query_latency".to_string(), query_latency);
        checks.insert("storage_footprint".to_string(), storage_footprint);
        checks.insert("index_utilization".to_string(), index_utilization);
        checks.insert("connection_saturation".to_string(), connection_saturation);
        checks.insert("slow_queries".to_string(), slow_queries);
        checks.insert("cache_health".to_string(), cache_health);

        let status = CheckStatus::worst_of(checks.values().map(|check| &check.status));
        let recommendations: Vec<String> = checks
            .values()
            .flat_map(|check| check.recommendations.iter().cloned())
            .collect();

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            status = %status,
            "health report assembled"
        );

        DatabaseHealthReport {
            status,
            timestamp: Utc::now(),
            checks,
            recommendations,
        }
    }

    async fn check_connectivity(&self) -> HealthCheckResult {
        let pool = match self.connection.pool().await {
            Some(pool) => pool,
            None => {
                return HealthCheckResult::critical("no active database connection")
                    .with_metric("state", json!(self.connection.state().await))
                    .with_recommendation(
                        "call connect() or wait for the automatic reconnect to restore service",
                    );
            }
        };

        let started = Instant::now();
        match sqlx::query("SELECT 1").fetch_one(&pool).await {
            Ok(_) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                let status = self.thresholds.grade_connectivity(latency_ms);
                let result = HealthCheckResult::with_status(
                    status,
                    format!("liveness probe answered in {latency_ms}ms"),
                )
                .with_metric("latency_ms", latency_ms)
                .with_metric("state", json!(self.connection.state().await));
                if status == CheckStatus::Healthy {
                    result
                } else {
                    result.with_recommendation(
                        "investigate network latency between the service and the database",
                    )
                }
            }
            Err(e) => HealthCheckResult::critical(format!("connectivity probe failed: {e}")),
        }
    }

    async fn check_query_latency(&self) -> HealthCheckResult {
        let snapshot = self.performance.snapshot();
        if snapshot.query_count == 0 {
            return HealthCheckResult::healthy("no queries recorded in the current window");
        }

        let metrics = self.performance.metrics();
        let status = self
            .thresholds
            .grade_query_latency(metrics.average_query_time_ms);
        let result = HealthCheckResult::with_status(
            status,
            format!(
                "average query time {:.1}ms over {} queries",
                metrics.average_query_time_ms, snapshot.query_count
            ),
        )
        .with_metric("average_query_time_ms", metrics.average_query_time_ms)
        .with_metric("query_count", snapshot.query_count)
        .with_metric("queries_per_second", metrics.queries_per_second);
        if status == CheckStatus::Healthy {
            result
        } else {
            result.with_recommendation("profile the slowest operations and check missing indexes")
        }
    }

    async fn check_storage_footprint(&self) -> HealthCheckResult {
        let pool = match self.connection.pool().await {
            Some(pool) => pool,
            None => return HealthCheckResult::warning("storage probe skipped: no connection"),
        };

        match sqlx::query_scalar::<_, i64>("SELECT pg_database_size(current_database())")
            .fetch_one(&pool)
            .await
        {
            Ok(size) => {
                let bytes = size.max(0) as u64;
                let status = self.thresholds.grade_storage(bytes);
                let result = HealthCheckResult::with_status(
                    status,
                    format!("database occupies {} MB", bytes / (1024 * 1024)),
                )
                .with_metric("database_size_bytes", bytes)
                .with_metric("database_size_mb", bytes / (1024 * 1024));
                if status == CheckStatus::Healthy {
                    result
                } else {
                    result.with_recommendation(
                        "archive old audit reports or expand the storage allocation",
                    )
                }
            }
            Err(e) => HealthCheckResult::warning(format!("storage probe failed: {e}")),
        }
    }

    async fn check_index_utilization(&self) -> HealthCheckResult {
        let pool = match self.connection.pool().await {
            Some(pool) => pool,
            None => return HealthCheckResult::warning("index probe skipped: no connection"),
        };

        let probe = sqlx::query_as::<_, (i64, i64)>(
            "SELECT \
             (SELECT COALESCE(SUM(idx_scan), 0)::BIGINT FROM pg_stat_user_indexes), \
             (SELECT COALESCE(SUM(seq_scan), 0)::BIGINT FROM pg_stat_user_tables)",
        )
        .fetch_one(&pool)
        .await;

        match probe {
            Ok((index_scans, seq_scans)) => {
                let total = index_scans + seq_scans;
                if total < MIN_SCANS_FOR_INDEX_CHECK {
                    return HealthCheckResult::healthy(
                        "not enough scan activity to judge index utilization",
                    )
                    .with_metric("index_scans", index_scans)
                    .with_metric("seq_scans", seq_scans);
                }
                let usage_percent = index_scans as f64 / total as f64 * 100.0;
                let status = self.thresholds.grade_index_usage(usage_percent);
                let result = HealthCheckResult::with_status(
                    status,
                    format!("{usage_percent:.1}% of scans use an index"),
                )
                .with_metric("index_scans", index_scans)
                .with_metric("seq_scans", seq_scans)
                .with_metric("index_usage_percent", usage_percent);
                if status == CheckStatus::Healthy {
                    result
                } else {
                    result.with_recommendation(
                        "review query plans, sequential scans dominate index scans",
                    )
                }
            }
            Err(e) => HealthCheckResult::warning(format!("index probe failed: {e}")),
        }
    }

    async fn check_connection_saturation(&self) -> HealthCheckResult {
        match self.connection.pool_stats().await {
            Some(stats) => {
                let utilization = stats.utilization_percentage() as f64;
                let status = self.thresholds.grade_pool_utilization(utilization);
                let result = HealthCheckResult::with_status(
                    status,
                    format!(
                        "{} of {} connections in use ({utilization:.1}%)",
                        stats.active, stats.max_size
                    ),
                )
                .with_metric("active", stats.active)
                .with_metric("idle", stats.idle)
                .with_metric("size", stats.size)
                .with_metric("max_size", stats.max_size)
                .with_metric("utilization_percent", utilization);
                if status == CheckStatus::Healthy {
                    result
                } else {
                    result.with_recommendation(
                        "raise DB_MAX_CONNECTIONS or reduce concurrent audit workers",
                    )
                }
            }
            None => HealthCheckResult::critical("no active connection pool"),
        }
    }

    async fn check_slow_queries(&self) -> HealthCheckResult {
        let snapshot = self.performance.snapshot();
        if snapshot.query_count == 0 {
            return HealthCheckResult::healthy("no queries recorded in the current window");
        }

        let metrics = self.performance.metrics();
        let status = self
            .thresholds
            .grade_slow_queries(metrics.slow_query_percentage);
        let result = HealthCheckResult::with_status(
            status,
            format!(
                "{} slow queries ({:.1}% of {})",
                snapshot.slow_query_count, metrics.slow_query_percentage, snapshot.query_count
            ),
        )
        .with_metric("slow_query_count", snapshot.slow_query_count)
        .with_metric("slow_query_percentage", metrics.slow_query_percentage)
        .with_metric("error_rate", metrics.error_rate);
        if status == CheckStatus::Healthy {
            result
        } else {
            result.with_recommendation(
                "inspect the slow query log and add indexes for the dominant operations",
            )
        }
    }

    async fn check_cache_health(&self) -> HealthCheckResult {
        let stats = self.cache.statistics().await;
        if stats.total_entries == 0 {
            return HealthCheckResult::healthy("cache is empty");
        }

        let expired_percent = stats.expired_count as f64 / stats.total_entries as f64 * 100.0;
        let status = self.thresholds.grade_expired_ratio(expired_percent);
        let result = HealthCheckResult::with_status(
            status,
            format!(
                "{} of {} entries expired ({expired_percent:.1}%)",
                stats.expired_count, stats.total_entries
            ),
        )
        .with_metric("total_entries", stats.total_entries as u64)
        .with_metric("expired_entries", stats.expired_count as u64)
        .with_metric("expired_percent", expired_percent)
        .with_metric("total_size_bytes", stats.total_size_bytes)
        .with_metric("hit_ratio", stats.hit_ratio);
        if status == CheckStatus::Healthy {
            result
        } else {
            result.with_recommendation(
                "lower CACHE_DEFAULT_TTL_SECONDS or run cleanup_expired more frequently",
            )
        }
    }
}
