//! Retry behavior of the query executor
//!
//! These tests drive the executor against an in-process fake connection to
//! verify error classification, attempt budgets, reconnect triggering, and
//! per-attempt performance accounting without a live database.

use async_trait::async_trait;
use sitepulse_db::db::connection::ConnectionState;
use sitepulse_db::db::error::{DbError, DbResult, ErrorKind};
use sitepulse_db::db::executor::{QueryExecutor, Reconnect};
use sitepulse_db::db::retry::{Jitter, RetryConfig};
use sitepulse_db::monitoring::performance::PerformanceMonitor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tracing_test::traced_test;

/// Fake connection that counts reconnect requests and can be told to refuse
/// them.
struct FakeConnection {
    state: ConnectionState,
    reconnects: AtomicU32,
    fail_reconnect: bool,
}

impl FakeConnection {
    fn connected() -> Self {
        Self {
            state: ConnectionState::Connected,
            reconnects: AtomicU32::new(0),
            fail_reconnect: false,
        }
    }

    fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnects: AtomicU32::new(0),
            fail_reconnect: false,
        }
    }

    fn with_failing_reconnect(mut self) -> Self {
        self.fail_reconnect = true;
        self
    }

    fn reconnect_count(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reconnect for FakeConnection {
    async fn connection_state(&self) -> ConnectionState {
        self.state
    }

    async fn reconnect(&self) -> DbResult<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_reconnect {
            Err(DbError::Connection("fake reconnect refused".to_string()))
        } else {
            Ok(())
        }
    }
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: Jitter::None,
    }
}

fn executor_with(
    connection: Arc<FakeConnection>,
    monitor: Arc<PerformanceMonitor>,
    max_attempts: u32,
) -> QueryExecutor {
    QueryExecutor::new(connection, monitor).with_retry(fast_retry(max_attempts))
}

/// Persistent connection failures exhaust the budget, reconnect after every
/// failed attempt, and surface a wrapped error naming the operation.
#[tokio::test]
#[traced_test]
async fn exhausted_budget_reports_attempts_and_reconnects() {
    let connection = Arc::new(FakeConnection::connected());
    let monitor = Arc::new(PerformanceMonitor::new(Duration::from_millis(500)));
    let executor = executor_with(connection.clone(), monitor, 3);

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let result: DbResult<()> = executor
        .execute_with_retry("load_report", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DbError::Connection("socket reset".to_string()))
            }
        })
        .await;

    let err = result.unwrap_err();
    match &err {
        DbError::RetriesExhausted {
            operation,
            attempts,
            source,
        } => {
            assert_eq!(operation, "load_report");
            assert_eq!(*attempts, 3);
            assert_eq!(source.kind(), ErrorKind::Connection);
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert!(err.to_string().contains("3 attempts"));
    assert!(err.to_string().contains("load_report"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(connection.reconnect_count(), 3);
}

/// A transient failure on the first attempt is absorbed by the retry loop.
#[tokio::test]
async fn recovers_on_second_attempt() {
    let connection = Arc::new(FakeConnection::connected());
    let monitor = Arc::new(PerformanceMonitor::new(Duration::from_millis(500)));
    let executor = executor_with(connection.clone(), monitor.clone(), 3);

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let result = executor
        .execute_with_retry("load_report", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(DbError::Connection("transient".to_string()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

    assert_eq!(assert_ok!(result), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(connection.reconnect_count(), 1);

    let snapshot = monitor.snapshot();
    assert_eq!(snapshot.query_count, 2);
    assert_eq!(snapshot.error_count, 1);
}

/// Validation failures are never retried and never trigger a reconnect.
#[tokio::test]
async fn validation_errors_fail_fast() {
    let connection = Arc::new(FakeConnection::connected());
    let monitor = Arc::new(PerformanceMonitor::new(Duration::from_millis(500)));
    let executor = executor_with(connection.clone(), monitor, 5);

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let result: DbResult<()> = executor
        .execute_with_retry("insert_report", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DbError::Validation(
                    "duplicate key value violates unique constraint".to_string(),
                ))
            }
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(matches!(err, DbError::Validation(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(connection.reconnect_count(), 0);
}

/// An attempt that outlives the client-side deadline is classified as a
/// timeout, which still counts against the budget.
#[tokio::test]
async fn slow_attempts_classify_as_timeout() {
    let connection = Arc::new(FakeConnection::connected());
    let monitor = Arc::new(PerformanceMonitor::new(Duration::from_millis(500)));
    let executor = QueryExecutor::new(connection.clone(), monitor)
        .with_retry(fast_retry(1))
        .with_query_timeout(Duration::from_millis(50));

    let result: DbResult<()> = executor
        .execute_with_retry("load_report", move || async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    match err {
        DbError::RetriesExhausted { source, .. } => match *source {
            DbError::Timeout {
                operation,
                elapsed_ms,
            } => {
                assert_eq!(operation, "load_report");
                assert_eq!(elapsed_ms, 50);
            }
            other => panic!("expected Timeout source, got {other:?}"),
        },
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    // Timeouts are a client-side give-up, not a connection loss.
    assert_eq!(connection.reconnect_count(), 0);
}

/// Every attempt is recorded with the monitor, not just the final outcome.
#[tokio::test]
async fn monitor_records_each_attempt() {
    let connection = Arc::new(FakeConnection::connected());
    let monitor = Arc::new(PerformanceMonitor::new(Duration::from_millis(500)));
    let executor = executor_with(connection, monitor.clone(), 3);

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let _result: DbResult<()> = executor
        .execute_with_retry("load_report", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DbError::Unknown("flaky".to_string()))
            }
        })
        .await;

    let snapshot = monitor.snapshot();
    assert_eq!(snapshot.query_count, 3);
    assert_eq!(snapshot.error_count, 3);
}

/// The attempt budget is honored exactly for several budget sizes.
#[tokio::test]
async fn invocation_count_matches_budget() {
    for budget in [1u32, 2, 5] {
        let connection = Arc::new(FakeConnection::connected());
        let monitor = Arc::new(PerformanceMonitor::new(Duration::from_millis(500)));
        let executor = executor_with(connection, monitor, budget);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: DbResult<()> = executor
            .execute_with_retry("load_report", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(DbError::Unknown("flaky".to_string()))
                }
            })
            .await;

        assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), budget);
    }
}

/// A refused reconnect is logged and swallowed; the retry that follows can
/// still succeed.
#[tokio::test]
#[traced_test]
async fn failed_reconnect_does_not_abort_retries() {
    let connection = Arc::new(FakeConnection::connected().with_failing_reconnect());
    let monitor = Arc::new(PerformanceMonitor::new(Duration::from_millis(500)));
    let executor = executor_with(connection.clone(), monitor, 3);

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let result = executor
        .execute_with_retry("load_report", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(DbError::Connection("transient".to_string()))
                } else {
                    Ok("recovered")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "recovered");
    assert_eq!(connection.reconnect_count(), 1);
}

/// A connection that reports itself down gets one pre-flight reconnect
/// before the first attempt runs.
#[tokio::test]
async fn disconnected_state_triggers_preflight_reconnect() {
    let connection = Arc::new(FakeConnection::disconnected());
    let monitor = Arc::new(PerformanceMonitor::new(Duration::from_millis(500)));
    let executor = executor_with(connection.clone(), monitor, 3);

    let result = executor
        .execute_with_retry("load_report", move || async move { Ok::<_, DbError>(1) })
        .await;

    assert_eq!(result.unwrap(), 1);
    assert_eq!(connection.reconnect_count(), 1);
}
