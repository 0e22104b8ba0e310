use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::db::connection::ConnectionState;
use crate::db::error::{DbError, DbResult, ErrorKind};
use crate::db::retry::RetryConfig;
use crate::monitoring::performance::PerformanceMonitor;

/// Seam between the executor and the connection lifecycle. Implemented by
/// `ConnectionManager`; tests substitute fakes.
#[async_trait]
pub trait Reconnect: Send + Sync {
    async fn connection_state(&self) -> ConnectionState;
    async fn reconnect(&self) -> DbResult<()>;
}

/// Runs database operations under a timeout with classified retries.
///
/// Every attempt, success or failure, is recorded with the performance
/// monitor under the caller-supplied operation name.
pub struct QueryExecutor {
    connection: Arc<dyn Reconnect>,
    monitor: Arc<PerformanceMonitor>,
    retry: RetryConfig,
    query_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(connection: Arc<dyn Reconnect>, monitor: Arc<PerformanceMonitor>) -> Self {
        Self {
            connection,
            monitor,
            retry: RetryConfig::query(),
            query_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    /// Invokes `op` until it succeeds or the attempt budget is spent.
    ///
    /// Validation failures are surfaced immediately and never retried. A
    /// connection-classified failure triggers a best-effort reconnect on the
    /// underlying connection before the next attempt; a failed reconnect is
    /// logged and the retry proceeds anyway. Exhausting the budget wraps the
    /// last failure in [`DbError::RetriesExhausted`].
    ///
    /// A timed-out attempt stops the client-side wait only. The server may
    /// still complete the statement, bounded by its own statement_timeout.
    pub async fn execute_with_retry<T, F, Fut>(&self, operation: &str, mut op: F) -> DbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        if self.connection.connection_state().await != ConnectionState::Connected {
            debug!(operation, "connection not ready, attempting reconnect first");
            if let Err(e) = self.connection.reconnect().await {
                warn!(operation, error = %e, "pre-flight reconnect failed");
            }
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let result = match timeout(self.query_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(DbError::Timeout {
                    operation: operation.to_string(),
                    elapsed_ms: self.query_timeout.as_millis() as u64,
                }),
            };
            self.monitor.record_query(started.elapsed(), operation);

            let err = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            self.monitor.record_error();

            if err.kind() == ErrorKind::Validation {
                debug!(operation, error = %err, "validation failure, not retrying");
                return Err(err);
            }

            if err.kind() == ErrorKind::Connection {
                warn!(
                    operation,
                    attempt,
                    error = %err,
                    "connection failure, attempting reconnect"
                );
                if let Err(reconnect_err) = self.connection.reconnect().await {
                    warn!(operation, error = %reconnect_err, "reconnect failed");
                }
            }

            if attempt >= max_attempts {
                warn!(operation, attempts = attempt, "retry budget exhausted");
                return Err(DbError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            warn!(
                operation,
                attempt,
                max_attempts,
                error = %err,
                "operation failed, backing off"
            );
            self.retry.sleep_before(attempt).await;
        }
    }
}
