//! logscope -- log analytics and anomaly detection over SQLite log tables.
//!
//! This crate reads HTTP access, function execution and network flow logs
//! for a bounded time window and derives metrics, trends, anomaly flags,
//! correlation views and severity-tiered alerts.

pub mod analysis;
pub mod api;
pub mod config;
pub mod detect;
pub mod export;
pub mod logs;
pub mod storage;

use anyhow::{Context, Result};

use crate::config::AnalyticsConfig;

/// Start the logscope HTTP API.
pub async fn serve(bind: &str, config: AnalyticsConfig) -> Result<()> {
    // 1. Open the store on the blocking pool; the open retries with backoff.
    let store_config = config.store.clone();
    tracing::info!(db_path = %store_config.path.display(), "opening log store");
    let store = tokio::task::spawn_blocking(move || storage::LogStore::from_config(&store_config))
        .await
        .context("store open task failed")??;

    // 2. Start API Server
    let addr: std::net::SocketAddr = bind.parse().with_context(|| format!("invalid bind address: {}", bind))?;
    let app = api::router(api::state::AppState::new(store, config));

    tracing::info!(%addr, "logscope listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
