pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod monitoring;

pub use config::{CacheConfig, Config, DatabaseConfig, MonitoringConfig};

// Re-export clock types for convenience
pub use clock::{Clock, ManualClock, SystemClock};

// Re-export database types
pub use db::{
    connection::{ConnectionHealth, ConnectionManager, ConnectionState, PoolStats},
    error::{DbError, DbResult, ErrorKind},
    executor::{QueryExecutor, Reconnect},
    retry::{Jitter, RetryConfig},
};

// Re-export cache types
pub use cache::{CacheEntry, CacheStatistics, CacheStore};

// Re-export monitoring types
pub use monitoring::{
    health::{HealthReporter, HealthThresholds},
    metrics::MetricsCollector,
    performance::{PerformanceMetrics, PerformanceMonitor, PerformanceSnapshot},
    CheckStatus, DatabaseHealthReport, HealthCheckResult,
};

// Re-export the HTTP surface
pub use api::{create_router, AppState};
