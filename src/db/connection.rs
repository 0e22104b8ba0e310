use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};

use crate::config::DatabaseConfig;
use crate::db::error::{DbError, DbResult};
use crate::db::executor::Reconnect;
use crate::db::retry::RetryConfig;

/// Automatic reconnects attempted per unhealthy episode before the loop
/// backs off and waits for manual intervention.
const MAX_AUTO_RECONNECTS: u32 = 3;

/// Platform tables the schema probe expects to find after connecting.
const EXPECTED_TABLES: usize = 2;

/// Lifecycle of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: u32,
    pub active: u32,
    pub max_size: u32,
}

impl PoolStats {
    pub fn utilization_percentage(&self) -> f32 {
        if self.max_size == 0 {
            return 0.0;
        }
        (self.active as f32 / self.max_size as f32) * 100.0
    }

    pub fn needs_attention(&self) -> bool {
        self.utilization_percentage() > 70.0
    }

    pub fn is_critically_saturated(&self) -> bool {
        self.utilization_percentage() > 90.0
    }
}

/// Rolling outcome of the liveness probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionHealth {
    pub healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_latency_ms: u64,
    pub consecutive_failures: u32,
    pub checks_total: u64,
    pub server_backends: Option<i32>,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            last_check: None,
            last_latency_ms: 0,
            consecutive_failures: 0,
            checks_total: 0,
            server_backends: None,
        }
    }
}

struct HealthLoop {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct ManagerInner {
    config: DatabaseConfig,
    health_check_interval: Duration,
    state: RwLock<ConnectionState>,
    pool: RwLock<Option<PgPool>>,
    // Serializes dialing and teardown across connect(), the executor,
    // the health loop and disconnect().
    connect_lock: Mutex<()>,
    health: RwLock<ConnectionHealth>,
    reconnect_attempts: AtomicU32,
    closed: AtomicBool,
    loop_handle: Mutex<Option<HealthLoop>>,
}

/// Owns the PostgreSQL pool and its lifecycle: dialing with backoff,
/// periodic liveness probes and bounded automatic reconnects.
///
/// `disconnect` is terminal. A manager that has been shut down refuses
/// further connect calls; create a fresh instance to reconnect.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(config: DatabaseConfig, health_check_interval: Duration) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                health_check_interval: health_check_interval.max(Duration::from_secs(1)),
                state: RwLock::new(ConnectionState::Disconnected),
                pool: RwLock::new(None),
                connect_lock: Mutex::new(()),
                health: RwLock::new(ConnectionHealth::default()),
                reconnect_attempts: AtomicU32::new(0),
                closed: AtomicBool::new(false),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    /// Establishes the pool, retrying with exponential backoff, and starts
    /// the periodic health loop. Calling this while already connected is a
    /// no-op.
    pub async fn connect(&self) -> DbResult<()> {
        self.inner.establish().await?;
        self.ensure_health_loop().await;
        Ok(())
    }

    /// Stops the health loop and closes the pool, waiting out any dial
    /// still in flight so its pool cannot survive the shutdown. Safe to
    /// call repeatedly; in-flight operations on previously acquired
    /// connections drain on their own.
    pub async fn disconnect(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!("disconnect called more than once, nothing to do");
            return;
        }
        if let Some(handle) = self.inner.loop_handle.lock().await.take() {
            let _ = handle.shutdown.send(());
            handle.task.abort();
        }
        let _guard = self.inner.connect_lock.lock().await;
        if let Some(pool) = self.inner.pool.write().await.take() {
            pool.close().await;
        }
        *self.inner.state.write().await = ConnectionState::Disconnected;
        info!("database connection closed");
    }

    /// Runs the liveness, pool and server probes once. Does not reconnect;
    /// recovery is the health loop's job.
    pub async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }

    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.read().await
    }

    /// Live pool handle for running statements. `None` until `connect`
    /// succeeds.
    pub async fn pool(&self) -> Option<PgPool> {
        self.inner.pool.read().await.clone()
    }

    pub async fn pool_stats(&self) -> Option<PoolStats> {
        self.inner.pool_stats().await
    }

    pub async fn health_snapshot(&self) -> ConnectionHealth {
        self.inner.health.read().await.clone()
    }

    async fn ensure_health_loop(&self) {
        let mut slot = self.inner.loop_handle.lock().await;
        if slot.is_some() || self.inner.closed.load(Ordering::SeqCst) {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let period = self.inner.health_check_interval;
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        inner.run_health_cycle().await;
                    }
                    _ = &mut shutdown_rx => {
                        debug!("health check loop stopping");
                        break;
                    }
                }
            }
        });
        *slot = Some(HealthLoop {
            shutdown: shutdown_tx,
            task,
        });
        debug!(
            interval_seconds = period.as_secs(),
            "health check loop started"
        );
    }
}

#[async_trait]
impl Reconnect for ConnectionManager {
    async fn connection_state(&self) -> ConnectionState {
        self.state().await
    }

    async fn reconnect(&self) -> DbResult<()> {
        self.connect().await
    }
}

impl ManagerInner {
    fn closed_error() -> DbError {
        DbError::Connection(
            "connection manager is shut down, create a new instance to reconnect".to_string(),
        )
    }

    async fn establish(&self) -> DbResult<()> {
        let _guard = self.connect_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(Self::closed_error());
        }
        if matches!(*self.state.read().await, ConnectionState::Connected)
            && self.pool.read().await.is_some()
        {
            debug!("connect called while already connected, nothing to do");
            return Ok(());
        }

        {
            let mut state = self.state.write().await;
            *state = match *state {
                ConnectionState::Connected
                | ConnectionState::Degraded
                | ConnectionState::Reconnecting => ConnectionState::Reconnecting,
                ConnectionState::Disconnected | ConnectionState::Connecting => {
                    ConnectionState::Connecting
                }
            };
        }

        let retry = RetryConfig::connect(
            self.config.connect_retries.max(1),
            Duration::from_millis(self.config.connect_retry_delay_ms),
        );

        let mut last_error: Option<DbError> = None;
        for attempt in 1..=retry.max_attempts {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Self::closed_error());
            }
            match self.dial_once().await {
                Ok(pool) => {
                    // A disconnect raced the dial; the fresh pool must not
                    // outlive it.
                    if self.closed.load(Ordering::SeqCst) {
                        pool.close().await;
                        return Err(Self::closed_error());
                    }
                    {
                        let mut slot = self.pool.write().await;
                        if let Some(old) = slot.replace(pool) {
                            // Drain the superseded pool off the connect path.
                            tokio::spawn(async move { old.close().await });
                        }
                    }
                    *self.state.write().await = ConnectionState::Connected;
                    self.reconnect_attempts.store(0, Ordering::SeqCst);
                    {
                        let mut health = self.health.write().await;
                        let was_healthy = health.healthy;
                        health.healthy = true;
                        health.consecutive_failures = 0;
                        if !was_healthy {
                            info!("database connection recovered");
                        }
                    }
                    info!(attempt, "database connection established");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = retry.max_attempts,
                        error = %e,
                        "database connection attempt failed"
                    );
                    last_error = Some(e);
                    if self.closed.load(Ordering::SeqCst) {
                        return Err(Self::closed_error());
                    }
                    if attempt < retry.max_attempts {
                        retry.sleep_before(attempt).await;
                    }
                }
            }
        }

        *self.state.write().await = ConnectionState::Disconnected;
        let cause = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        Err(DbError::Connection(format!(
            "failed to connect after {} attempts: {cause}",
            retry.max_attempts
        )))
    }

    async fn dial_once(&self) -> DbResult<PgPool> {
        let connect_timeout = self.config.connect_timeout();
        let options = PgConnectOptions::from_str(&self.config.url)
            .map_err(DbError::from)?
            .application_name("sitepulse-db")
            .options([
                (
                    "statement_timeout",
                    format!("{}s", self.config.statement_timeout_seconds),
                ),
                (
                    "idle_in_transaction_session_timeout",
                    format!("{}s", self.config.transaction_timeout_seconds),
                ),
            ]);

        let pool_options = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .min_connections(self.config.min_connections)
            .acquire_timeout(connect_timeout)
            .idle_timeout(Some(self.config.idle_timeout()))
            .max_lifetime(Some(self.config.max_lifetime()))
            .test_before_acquire(true);

        let pool = match timeout(connect_timeout, pool_options.connect_with(options)).await {
            Ok(Ok(pool)) => pool,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(DbError::Timeout {
                    operation: "connect".to_string(),
                    elapsed_ms: connect_timeout.as_millis() as u64,
                })
            }
        };

        if let Err(e) = sqlx::query("SELECT 1").fetch_one(&pool).await {
            pool.close().await;
            return Err(DbError::Connection(format!("liveness probe failed: {e}")));
        }

        // Missing tables are survivable, migrations may still be pending.
        match sqlx::query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_name IN ('audit_reports', 'cached_responses')",
        )
        .fetch_all(&pool)
        .await
        {
            Ok(rows) if rows.len() < EXPECTED_TABLES => {
                warn!(
                    found = rows.len(),
                    expected = EXPECTED_TABLES,
                    "platform tables missing, continuing anyway"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "schema probe failed, continuing anyway"),
        }

        Ok(pool)
    }

    async fn health_check(&self) -> bool {
        let pool = { self.pool.read().await.clone() };
        let started = Instant::now();
        let (healthy, probe_error) = match &pool {
            None => (false, Some("no active pool".to_string())),
            Some(pool) => match sqlx::query("SELECT 1").fetch_one(pool).await {
                Ok(_) => (true, None),
                Err(e) => (false, Some(e.to_string())),
            },
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let server_backends = match (&pool, healthy) {
            (Some(pool), true) => {
                match sqlx::query_scalar::<_, i32>(
                    "SELECT numbackends FROM pg_stat_database WHERE datname = current_database()",
                )
                .fetch_optional(pool)
                .await
                {
                    Ok(value) => value,
                    Err(e) => {
                        debug!(error = %e, "server metrics probe failed");
                        None
                    }
                }
            }
            _ => None,
        };

        if let Some(stats) = self.pool_stats().await {
            if stats.is_critically_saturated() {
                warn!(
                    utilization = stats.utilization_percentage(),
                    active = stats.active,
                    max = stats.max_size,
                    "connection pool critically saturated"
                );
            } else if stats.needs_attention() {
                info!(
                    utilization = stats.utilization_percentage(),
                    "connection pool utilization elevated"
                );
            }
        }

        let mut health = self.health.write().await;
        let was_healthy = health.healthy;
        health.healthy = healthy;
        health.checks_total += 1;
        health.last_check = Some(Utc::now());
        health.last_latency_ms = latency_ms;
        health.server_backends = server_backends;
        if healthy {
            health.consecutive_failures = 0;
            if !was_healthy {
                info!(latency_ms, "database connection recovered");
            }
        } else {
            health.consecutive_failures += 1;
            if let Some(error) = probe_error {
                warn!(
                    consecutive_failures = health.consecutive_failures,
                    error = %error,
                    "database health check failed"
                );
            }
        }
        healthy
    }

    async fn run_health_cycle(&self) {
        if self.health_check().await {
            return;
        }

        {
            let mut state = self.state.write().await;
            if matches!(*state, ConnectionState::Connected) {
                *state = ConnectionState::Degraded;
            }
        }

        let attempts = self.reconnect_attempts.load(Ordering::SeqCst);
        if attempts >= MAX_AUTO_RECONNECTS {
            error!(
                attempts,
                "reconnect budget exhausted, manual intervention required"
            );
            return;
        }
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        info!(
            attempt = attempts + 1,
            max = MAX_AUTO_RECONNECTS,
            "attempting automatic reconnect"
        );
        if let Err(e) = self.establish().await {
            warn!(error = %e, "automatic reconnect failed");
        }
    }

    async fn pool_stats(&self) -> Option<PoolStats> {
        let pool = self.pool.read().await;
        pool.as_ref().map(|pool| {
            let size = pool.size();
            let idle = pool.num_idle() as u32;
            PoolStats {
                size,
                idle,
                active: size.saturating_sub(idle),
                max_size: self.config.max_connections,
            }
        })
    }
}
