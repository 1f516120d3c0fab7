// =============================================================================
// Market Data Core — Main Entry Point
// =============================================================================
//
// Wires the runtime config, the embedded store, every collector, the K-line
// sync engine, the TA strategy, and the scheduler into one `AppState`, then
// serves the REST API until a shutdown signal arrives.
// =============================================================================

mod api;
mod app_state;
mod binance;
mod collectors;
mod errors;
mod indicators;
mod kline_sync;
mod market_data_service;
mod rate_limit;
mod runtime_config;
mod scheduler;
mod store;
mod ta_strategy;
mod types;
mod util;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::RuntimeConfig;
use crate::types::Interval;

const RUNTIME_CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("market-data-core starting up");

    let mut config = RuntimeConfig::load(RUNTIME_CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });

    if let Ok(syms) = std::env::var("MARKETDATA_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if config.symbols.is_empty() {
        config.symbols = vec![
            "BTCUSDT".into(),
            "ETHUSDT".into(),
            "BNBUSDT".into(),
            "XRPUSDT".into(),
            "SOLUSDT".into(),
        ];
    }

    info!(symbols = ?config.symbols, data_dir = %config.data_dir, "runtime config loaded");

    // ── 2. Open the embedded store ───────────────────────────────────────
    std::fs::create_dir_all(&config.data_dir).ok();
    let db_path = std::path::Path::new(&config.data_dir).join("marketdata.sqlite3");
    let store = store::Store::open(&db_path)?;

    // ── 3. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config, store));

    // ── 4. Warm the kline cache for the configured watch set ────────────
    let warm_state = state.clone();
    tokio::spawn(async move {
        let symbols = warm_state.runtime_config.read().symbols.clone();
        let tfs = [Interval::M15, Interval::H1, Interval::H4];
        info!(count = symbols.len(), "warming kline cache for watch set");
        warm_state.kline_sync.sync_watch_set(&symbols, &tfs).await;
        info!("initial kline warm-up complete");
    });

    // ── 5. Start the scheduler's background jobs ─────────────────────────
    let spiders = state.spiders();
    state.scheduler.start(spiders);
    info!("scheduler started: market_cache_refresh, klines_incremental_sync, crawler_check, portfolio_snapshot, flush_risk_events");

    // ── 6. Start the API server ───────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = std::env::var("MARKETDATA_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let bind_addr_clone = bind_addr.clone();

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr_clone, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("all subsystems running, press Ctrl+C to stop");

    // ── 7. Graceful shutdown ──────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");

    if let Err(e) = state.runtime_config.read().save(RUNTIME_CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("market-data-core shut down complete");
    Ok(())
}
