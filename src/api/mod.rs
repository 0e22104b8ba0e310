use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use sysinfo::{Pid, System};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::CacheStore;
use crate::db::connection::{ConnectionManager, ConnectionState};
use crate::monitoring::health::HealthReporter;
use crate::monitoring::metrics::MetricsCollector;
use crate::monitoring::performance::PerformanceMonitor;
use crate::monitoring::CheckStatus;

/// Shared state for the health and metrics endpoints
#[derive(Clone)]
pub struct AppState {
    pub connection: Arc<ConnectionManager>,
    pub performance: Arc<PerformanceMonitor>,
    pub cache: Arc<CacheStore>,
    pub reporter: Arc<HealthReporter>,
    pub metrics: Arc<MetricsCollector>,
    pub started_at: DateTime<Utc>,
}

/// Create the health and metrics router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/detailed", get(health_detailed))
        .route("/health/database", get(health_database))
        .route("/health/readiness", get(readiness))
        .route("/health/liveness", get(liveness))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Basic health check endpoint
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "sitepulse-db",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
        "timestamp": Utc::now(),
    }))
}

/// Liveness probe, answers whenever the process is running
async fn liveness() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}

/// Readiness probe, ready only with a connected pool and no critical checks
async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let connection_state = state.connection.state().await;
    if connection_state != ConnectionState::Connected {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "reason": format!("connection is {connection_state}"),
            })),
        );
    }

    let report = state.reporter.report().await;
    if report.status == CheckStatus::Critical {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "reason": "one or more health checks are critical",
            })),
        );
    }

    (StatusCode::OK, Json(json!({ "status": "ready" })))
}

/// Full health report with per-check results and a system overview
async fn health_detailed(State(state): State<AppState>) -> Json<Value> {
    let report = state.reporter.report().await;

    let mut sys = System::new();
    sys.refresh_memory();
    let pid = Pid::from_u32(std::process::id());
    sys.refresh_process(pid);
    let process_memory_bytes = sys.process(pid).map(|p| p.memory()).unwrap_or(0);

    Json(json!({
        "status": report.status,
        "timestamp": report.timestamp,
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
        "system": {
            "process_memory_bytes": process_memory_bytes,
            "memory_used_bytes": sys.used_memory(),
            "memory_total_bytes": sys.total_memory(),
        },
        "checks": report.checks,
        "recommendations": report.recommendations,
    }))
}

/// Connection, performance, and cache internals in one payload
async fn health_database(State(state): State<AppState>) -> Json<Value> {
    let connection_state = state.connection.state().await;
    let pool_stats = state.connection.pool_stats().await;
    let connection_health = state.connection.health_snapshot().await;
    let window = state.performance.snapshot();
    let derived = state.performance.metrics();
    let cache_stats = state.cache.statistics().await;

    Json(json!({
        "status": connection_state,
        "timestamp": Utc::now(),
        "connection": {
            "state": connection_state,
            "pool": pool_stats.as_ref().map(|p| json!({
                "size": p.size,
                "idle": p.idle,
                "active": p.active,
                "max_size": p.max_size,
                "utilization_percent": p.utilization_percentage(),
            })),
            "health": connection_health,
        },
        "performance": {
            "window": window,
            "derived": derived,
        },
        "cache": cache_stats,
    }))
}

/// Prometheus text exposition, refreshed from the in-process monitors
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let window = state.performance.snapshot();
    let derived = state.performance.metrics();
    state.metrics.update_query_metrics(&window, &derived);
    state
        .metrics
        .update_pool_metrics(state.connection.pool_stats().await.as_ref());
    state
        .metrics
        .update_cache_metrics(&state.cache.statistics().await);

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.gather_metrics(),
    )
}
