mod config;
mod db;
mod errors;
mod models;
mod routes;
mod state;
mod subscription;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, StorageBackend};
use crate::db::create_pool;
use crate::routes::build_router;
use crate::state::AppState;
use crate::subscription::manager::SubscriptionManager;
use crate::subscription::pg_store::PgUsageStore;
use crate::subscription::store::{MemoryUsageStore, UsageStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting meter v{}", env!("CARGO_PKG_VERSION"));

    let store = build_store(&config).await?;
    info!("Usage store initialized (backend: {})", store.backend());

    let state = AppState {
        subscriptions: SubscriptionManager::new(store),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn build_store(config: &Config) -> Result<Arc<dyn UsageStore>> {
    match config.storage_backend {
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres backend")?;
            let pool = create_pool(url).await?;
            Ok(Arc::new(PgUsageStore::new(pool)))
        }
        StorageBackend::Memory => Ok(Arc::new(MemoryUsageStore::new())),
    }
}
