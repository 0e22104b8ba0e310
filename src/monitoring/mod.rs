pub mod health;
pub mod metrics;
pub mod performance;

pub use health::{HealthReporter, HealthThresholds};
pub use metrics::MetricsCollector;
pub use performance::{PerformanceMetrics, PerformanceMonitor, PerformanceSnapshot};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Severity of a single health check. Variants are ordered so the aggregate
/// can take the worst observed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Healthy,
    Warning,
    Critical,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Healthy => "healthy",
            CheckStatus::Warning => "warning",
            CheckStatus::Critical => "critical",
        }
    }

    /// Worst status in the iterator; an empty battery counts as healthy.
    pub fn worst_of<'a, I>(statuses: I) -> CheckStatus
    where
        I: IntoIterator<Item = &'a CheckStatus>,
    {
        statuses
            .into_iter()
            .copied()
            .max()
            .unwrap_or(CheckStatus::Healthy)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one check: a severity, a human message and the raw numbers
/// the grade was derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: CheckStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metrics: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

impl HealthCheckResult {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Healthy, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Warning, message)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Critical, message)
    }

    pub fn with_status(status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            metrics: Map::new(),
            recommendations: Vec::new(),
        }
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }
}

/// Composite report assembled from the full check battery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseHealthReport {
    pub status: CheckStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: HashMap<String, HealthCheckResult>,
    pub recommendations: Vec<String>,
}
