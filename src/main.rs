//! corebank - Custodial Banking Core
//!
//! Funds transfer and ledger consistency engine with a thin HTTP surface.
//! Session handling, CSRF, and rate limiting live in the upstream request
//! layer; this service trusts the identity it is handed and concentrates on
//! moving money safely.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use corebank::api::{self, AppState};
use corebank::auth::OwnerOrAdminGate;
use corebank::audit::TracingAuditSink;
use corebank::config::{Config, StoreBackend};
use corebank::db;
use corebank::engine::TransferEngine;
use corebank::ledger::Ledger;
use corebank::store::{AccountStore, MemoryStore, PostgresStore};

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "corebank=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the application router
fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check (no auth)
        .route("/health", axum::routing::get(health_check))
        .nest("/api/v1", api::create_router(state))
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let (store, ledger): (Arc<dyn AccountStore>, Arc<dyn Ledger>) = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL not set"))?;

            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(database_url)
                .await?;

            db::verify_connection(&pool).await?;
            if !db::check_schema(&pool).await? {
                anyhow::bail!("Database schema incomplete. Please run migrations.");
            }
            tracing::info!("Database connected successfully");

            let store = Arc::new(PostgresStore::new(pool, config.lock_wait));
            (store.clone() as Arc<dyn AccountStore>, store)
        }
        StoreBackend::Memory => {
            if config.is_production() {
                anyhow::bail!("The in-memory store is not allowed in production");
            }
            tracing::warn!("Using in-memory store; state is not durable");
            let store = Arc::new(MemoryStore::with_lock_wait(config.lock_wait));
            (store.clone() as Arc<dyn AccountStore>, store)
        }
    };

    let gate = Arc::new(OwnerOrAdminGate::new(store.clone()));
    let audit = Arc::new(TracingAuditSink);
    let engine = Arc::new(TransferEngine::new(
        store.clone(),
        ledger.clone(),
        gate,
        audit,
    ));

    Ok(AppState {
        engine,
        store,
        ledger,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    init_tracing();

    // Load configuration
    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("Starting corebank server");

    let state = build_state(&config).await?;
    let app = build_router(state);

    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
