//! EMI Ledger Server
//!
//! REST API server for the loan ledger and payment settlement engine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use emi_ledger::{
    api,
    clock::SystemClock,
    config::{AppConfig, StoreBackend},
    repository::{InMemoryLedgerStore, PgLedgerStore, Repository},
    services::{
        audit::{AuditService, AuditSink, MemoryAuditSink, PgAuditSink},
        sweeper, Services,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("emi_ledger={},tower_http=debug", config.logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting EMI Ledger v{}", env!("CARGO_PKG_VERSION"));

    let (repository, audit_sink): (Repository, Arc<dyn AuditSink>) = match config.ledger.backend {
        StoreBackend::Postgres => {
            // Create database connection pool
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
                .connect(&config.database.url)
                .await
                .context("Failed to connect to database")?;

            tracing::info!("Connected to database");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run database migrations")?;

            tracing::info!("Database migrations completed");

            let repository: Repository = Arc::new(PgLedgerStore::new(pool.clone()));
            let sink: Arc<dyn AuditSink> = Arc::new(PgAuditSink::new(pool));
            (repository, sink)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory ledger store; data is lost on shutdown");
            let repository: Repository = Arc::new(InMemoryLedgerStore::new());
            let sink: Arc<dyn AuditSink> = Arc::new(MemoryAuditSink::new());
            (repository, sink)
        }
    };

    let services = Services::new(
        repository,
        Arc::new(SystemClock),
        AuditService::new(audit_sink),
        config.ledger.clone(),
    );

    if config.ledger.sweep_interval_secs > 0 {
        sweeper::spawn(
            services.loans.clone(),
            Duration::from_secs(config.ledger.sweep_interval_secs),
        );
        tracing::info!(
            "Overdue sweeper running every {}s",
            config.ledger.sweep_interval_secs
        );
    }

    let addr = SocketAddr::new(
        config.server.host.parse().context("Invalid host address")?,
        config.server.port,
    );

    // Create application state
    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };

    let app = api::create_router(state);

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
