//! Query performance accounting for the resilience layer.
//!
//! Counters are plain atomics so recording from the executor hot path never
//! blocks. Derived rates are computed on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::clock::{Clock, SystemClock};

/// Raw counters accumulated since the window started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub query_count: u64,
    pub total_query_time_ms: u64,
    pub slow_query_count: u64,
    pub error_count: u64,
    pub window_started_at: DateTime<Utc>,
}

/// Rates derived from the current window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub average_query_time_ms: f64,
    pub slow_query_percentage: f64,
    pub error_rate: f64,
    pub queries_per_second: f64,
}

#[derive(Debug)]
pub struct PerformanceMonitor {
    slow_query_threshold: Duration,
    clock: Arc<dyn Clock>,
    query_count: AtomicU64,
    total_query_time_us: AtomicU64,
    slow_query_count: AtomicU64,
    error_count: AtomicU64,
    window_started_at_ms: AtomicI64,
}

impl PerformanceMonitor {
    pub fn new(slow_query_threshold: Duration) -> Self {
        Self::with_clock(slow_query_threshold, Arc::new(SystemClock))
    }

    pub fn with_clock(slow_query_threshold: Duration, clock: Arc<dyn Clock>) -> Self {
        let now_ms = clock.now().timestamp_millis();
        Self {
            slow_query_threshold,
            clock,
            query_count: AtomicU64::new(0),
            total_query_time_us: AtomicU64::new(0),
            slow_query_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            window_started_at_ms: AtomicI64::new(now_ms),
        }
    }

    /// Records one executed attempt. Attempts that exceed the slow query
    /// threshold are counted and logged with their operation name.
    pub fn record_query(&self, duration: Duration, operation: &str) {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        self.total_query_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        if duration > self.slow_query_threshold {
            self.slow_query_count.fetch_add(1, Ordering::Relaxed);
            warn!(
                operation,
                duration_ms = duration.as_millis() as u64,
                threshold_ms = self.slow_query_threshold.as_millis() as u64,
                "slow query detected"
            );
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            query_count: self.query_count.load(Ordering::Relaxed),
            total_query_time_ms: self.total_query_time_us.load(Ordering::Relaxed) / 1000,
            slow_query_count: self.slow_query_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            window_started_at: self.window_started_at(),
        }
    }

    /// Derived rates for the current window. All rates are 0 while the
    /// window is empty.
    pub fn metrics(&self) -> PerformanceMetrics {
        let count = self.query_count.load(Ordering::Relaxed);
        let total_us = self.total_query_time_us.load(Ordering::Relaxed);
        let slow = self.slow_query_count.load(Ordering::Relaxed);
        let errors = self.error_count.load(Ordering::Relaxed);

        let (average_query_time_ms, slow_query_percentage, error_rate) = if count == 0 {
            (0.0, 0.0, 0.0)
        } else {
            (
                total_us as f64 / 1000.0 / count as f64,
                slow as f64 / count as f64 * 100.0,
                errors as f64 / count as f64 * 100.0,
            )
        };

        let elapsed_secs =
            (self.clock.now() - self.window_started_at()).num_milliseconds() as f64 / 1000.0;
        let queries_per_second = if elapsed_secs > 0.0 {
            count as f64 / elapsed_secs
        } else {
            0.0
        };

        PerformanceMetrics {
            average_query_time_ms,
            slow_query_percentage,
            error_rate,
            queries_per_second,
        }
    }

    /// Zeroes all counters and restarts the window.
    pub fn reset(&self) {
        self.query_count.store(0, Ordering::Relaxed);
        self.total_query_time_us.store(0, Ordering::Relaxed);
        self.slow_query_count.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
        self.window_started_at_ms
            .store(self.clock.now().timestamp_millis(), Ordering::Relaxed);
    }

    fn window_started_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.window_started_at_ms.load(Ordering::Relaxed))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
