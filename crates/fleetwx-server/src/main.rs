//! fleetwxd - facility weather dashboard backend
//!
//! Loads the facility fleet, keeps its weather fresh through the paced fetch
//! pipeline and serves clustered map markers and detail views over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fleetwx_config::AppConfig;
use fleetwx_core::{load_facilities, seed_facilities};
use fleetwx_fetch::{OpenWeatherClient, PacerConfig, ThrottledFetcher};
use fleetwx_server::{build_app, refresh::spawn_refresh, MapSettings};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Observability
    fleetwx_obs::init("fleetwxd");

    // Config
    let cfg = AppConfig::load().context("Failed to load configuration")?;
    cfg.validate()?;
    let api_key = cfg.api_key()?;
    let settings = MapSettings::from_config(&cfg).context("Invalid map configuration")?;

    let facilities = match &cfg.facilities.path {
        Some(path) => load_facilities(path)
            .with_context(|| format!("Failed to load facilities from {}", path.display()))?,
        None => seed_facilities().context("Bundled facility data is invalid")?,
    };
    info!(facilities = facilities.len(), "Fleet loaded");

    // Fetch pipeline
    let client = OpenWeatherClient::new(
        api_key,
        &cfg.weather.base_url,
        Duration::from_secs(cfg.weather.request_timeout_secs),
        cfg.weather.exclude_minutely,
    )?;
    let fetcher = ThrottledFetcher::spawn(
        Arc::new(client),
        PacerConfig {
            requests_per_minute: cfg.weather.requests_per_minute,
            request_timeout: Duration::from_secs(cfg.weather.request_timeout_secs),
        },
    )?;

    // Build app and state
    let (app, state) = build_app(facilities, settings, Some(fetcher.clone()))?;

    // Background refresh; readiness flips after the first batch
    let refresh = spawn_refresh(
        state.clone(),
        fetcher.clone(),
        Duration::from_secs(cfg.refresh.interval_secs),
    );

    // Start HTTP server
    let addr: SocketAddr = cfg
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid HTTP bind address {}", cfg.server.bind))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(%addr, "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    refresh.abort();
    fetcher.shutdown();
    info!("fleetwxd stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
