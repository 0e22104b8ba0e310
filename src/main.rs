use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use sitepulse_db::api::{create_router, AppState};
use sitepulse_db::cache::CacheStore;
use sitepulse_db::config::Config;
use sitepulse_db::db::connection::ConnectionManager;
use sitepulse_db::monitoring::health::HealthReporter;
use sitepulse_db::monitoring::metrics::MetricsCollector;
use sitepulse_db::monitoring::performance::PerformanceMonitor;
use sitepulse_db::monitoring::CheckStatus;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sitepulse-db")]
#[command(about = "Database resilience and caching layer for the SitePulse audit platform")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the health and metrics server
    Serve {
        /// Override the HTTP port from configuration
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the database health checks once and report the results
    Health {
        /// Print the full report as JSON
        #[arg(long)]
        detailed: bool,
    },
    /// Print the effective configuration and validate it
    ConfigCheck,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Some(Commands::Serve { port }) => run_serve(config, port).await,
        Some(Commands::Health { detailed }) => run_health(config, detailed).await,
        Some(Commands::ConfigCheck) => run_config_check(config),
        None => run_serve(config, None).await,
    }
}

async fn run_serve(config: Config, port_override: Option<u16>) -> Result<()> {
    config.validate()?;

    let port = port_override.unwrap_or(config.http_port);

    info!("🚀 Starting SitePulse database layer...");
    info!("Database: {}", config.safe_database_url());

    let connection = Arc::new(ConnectionManager::new(
        config.database.clone(),
        config.monitoring.health_check_interval(),
    ));
    let performance = Arc::new(PerformanceMonitor::new(
        config.monitoring.slow_query_threshold(),
    ));
    let cache = Arc::new(CacheStore::new(config.cache.clone()));

    connection
        .connect()
        .await
        .context("initial database connection failed")?;

    let reporter = Arc::new(HealthReporter::new(
        connection.clone(),
        performance.clone(),
        cache.clone(),
    ));
    let metrics = Arc::new(MetricsCollector::new()?);

    let state = AppState {
        connection: connection.clone(),
        performance,
        cache,
        reporter,
        metrics,
        started_at: Utc::now(),
    };

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;

    info!("✅ Health endpoints available at http://0.0.0.0:{port}/health");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    connection.disconnect().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}

async fn run_health(config: Config, detailed: bool) -> Result<()> {
    config.validate()?;

    info!("🏥 Running database health checks...");

    let connection = Arc::new(ConnectionManager::new(
        config.database.clone(),
        config.monitoring.health_check_interval(),
    ));
    let performance = Arc::new(PerformanceMonitor::new(
        config.monitoring.slow_query_threshold(),
    ));
    let cache = Arc::new(CacheStore::new(config.cache.clone()));

    connection
        .connect()
        .await
        .context("database connection failed")?;

    let reporter = HealthReporter::new(connection.clone(), performance, cache);
    let report = reporter.report().await;

    if detailed {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (name, check) in &report.checks {
            match check.status {
                CheckStatus::Healthy => info!("✅ {}: {}", name, check.message),
                CheckStatus::Warning => warn!("⚠️  {}: {}", name, check.message),
                CheckStatus::Critical => error!("❌ {}: {}", name, check.message),
            }
        }
        match report.status {
            CheckStatus::Healthy => info!("✅ Database is healthy"),
            CheckStatus::Warning => warn!("⚠️  Database health is degraded"),
            CheckStatus::Critical => error!("❌ Database health is critical"),
        }
    }

    connection.disconnect().await;

    if report.status == CheckStatus::Critical {
        anyhow::bail!("health check reported critical status");
    }

    Ok(())
}

fn run_config_check(config: Config) -> Result<()> {
    println!("{}", config.summary());
    println!();

    match config.validate() {
        Ok(()) => {
            println!("✅ Configuration is valid");
            Ok(())
        }
        Err(e) => {
            println!("❌ Configuration is invalid: {e}");
            Err(e)
        }
    }
}
