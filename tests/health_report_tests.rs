//! Health report assembly without a live database
//!
//! The reporter must always produce a full report. Probes that need a pool
//! degrade to warning or critical results when no connection exists, and
//! the in-process checks (query latency, slow queries, cache) grade real
//! monitor data.

use chrono::{TimeZone, Utc};
use serde_json::json;
use sitepulse_db::cache::CacheStore;
use sitepulse_db::clock::ManualClock;
use sitepulse_db::config::{CacheConfig, DatabaseConfig};
use sitepulse_db::db::connection::ConnectionManager;
use sitepulse_db::monitoring::health::HealthReporter;
use sitepulse_db::monitoring::performance::PerformanceMonitor;
use sitepulse_db::monitoring::CheckStatus;
use std::sync::Arc;
use std::time::Duration;

const EXPECTED_CHECKS: [&str; 7] = [
    "connectivity",
    "query_latency",
    "storage_footprint",
    "index_utilization",
    "connection_saturation",
    "slow_queries",
    "cache_health",
];

fn reporter_without_pool() -> (
    HealthReporter,
    Arc<PerformanceMonitor>,
    Arc<CacheStore>,
) {
    let connection = Arc::new(ConnectionManager::new(
        DatabaseConfig::default(),
        Duration::from_secs(30),
    ));
    let performance = Arc::new(PerformanceMonitor::new(Duration::from_millis(1000)));
    let cache = Arc::new(CacheStore::new(CacheConfig::default()));
    let reporter = HealthReporter::new(connection, performance.clone(), cache.clone());
    (reporter, performance, cache)
}

/// Every check appears in the report even when nothing is connected.
#[tokio::test]
async fn report_contains_full_check_battery() {
    let (reporter, _performance, _cache) = reporter_without_pool();

    let report = reporter.report().await;

    assert_eq!(report.checks.len(), EXPECTED_CHECKS.len());
    for name in EXPECTED_CHECKS {
        assert!(report.checks.contains_key(name), "missing check {name}");
    }
}

/// Without a pool the connectivity probe is critical and drags the
/// aggregate status down with it.
#[tokio::test]
async fn missing_pool_yields_critical_aggregate() {
    let (reporter, _performance, _cache) = reporter_without_pool();

    let report = reporter.report().await;

    let connectivity = &report.checks["connectivity"];
    assert_eq!(connectivity.status, CheckStatus::Critical);
    assert!(connectivity.message.contains("no active database connection"));

    assert_eq!(
        report.checks["connection_saturation"].status,
        CheckStatus::Critical
    );
    assert_eq!(
        report.checks["storage_footprint"].status,
        CheckStatus::Warning
    );
    assert_eq!(report.status, CheckStatus::Critical);
    assert!(!report.recommendations.is_empty());
}

/// In-process checks stay healthy while nothing has been recorded.
#[tokio::test]
async fn idle_monitors_report_healthy_checks() {
    let (reporter, _performance, _cache) = reporter_without_pool();

    let report = reporter.report().await;

    assert_eq!(report.checks["query_latency"].status, CheckStatus::Healthy);
    assert_eq!(report.checks["slow_queries"].status, CheckStatus::Healthy);
    let cache_check = &report.checks["cache_health"];
    assert_eq!(cache_check.status, CheckStatus::Healthy);
    assert!(cache_check.message.contains("cache is empty"));
}

/// Recorded latencies feed the query latency grade.
#[tokio::test]
async fn elevated_latency_grades_warning_and_critical() {
    let (reporter, performance, _cache) = reporter_without_pool();

    for _ in 0..10 {
        performance.record_query(Duration::from_millis(800), "load_report");
    }
    let report = reporter.report().await;
    assert_eq!(report.checks["query_latency"].status, CheckStatus::Warning);

    performance.reset();
    for _ in 0..10 {
        performance.record_query(Duration::from_millis(2500), "load_report");
    }
    let report = reporter.report().await;
    assert_eq!(report.checks["query_latency"].status, CheckStatus::Critical);
}

/// A window dominated by slow queries trips the slow query check.
#[tokio::test]
async fn slow_query_share_grades_critical() {
    let (reporter, performance, _cache) = reporter_without_pool();

    // 4 of 10 queries slow: 40% is past the 25% critical threshold
    for i in 0..10 {
        let duration = if i < 4 {
            Duration::from_millis(1500)
        } else {
            Duration::from_millis(100)
        };
        performance.record_query(duration, "load_report");
    }

    let report = reporter.report().await;
    assert_eq!(report.checks["slow_queries"].status, CheckStatus::Critical);
}

/// A cache full of expired entries produces a warning with a cleanup
/// recommendation.
#[tokio::test]
async fn stale_cache_grades_warning() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
    ));
    let cache = Arc::new(CacheStore::with_clock(CacheConfig::default(), clock.clone()));

    let connection = Arc::new(ConnectionManager::new(
        DatabaseConfig::default(),
        Duration::from_secs(30),
    ));
    let performance = Arc::new(PerformanceMonitor::new(Duration::from_millis(1000)));
    let reporter = HealthReporter::new(connection, performance, cache.clone());

    for i in 0..2 {
        cache
            .set(
                &format!("short:{i}"),
                "https://example.com",
                json!({}),
                Some(Duration::from_secs(60)),
                vec![],
            )
            .await
            .unwrap();
    }
    cache
        .set(
            "long:0",
            "https://example.com",
            json!({}),
            Some(Duration::from_secs(7200)),
            vec![],
        )
        .await
        .unwrap();

    // 2 of 3 entries expired: 66.7% is past the 50% warning threshold
    clock.advance(chrono::Duration::seconds(120));

    let report = reporter.report().await;
    let cache_check = &report.checks["cache_health"];
    assert_eq!(cache_check.status, CheckStatus::Warning);
    assert!(!cache_check.recommendations.is_empty());
}
