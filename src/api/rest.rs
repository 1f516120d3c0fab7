// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// The transport-agnostic core exposed over HTTP: a market-data snapshot, a
// K-line read endpoint, a TA analysis endpoint, and agent-signal
// write/list. No auth layer — this core has no account/session concept to
// authenticate against — but CORS stays on as the same ambient transport
// hygiene the original dashboard API carried.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::store::signals::AgentSignal;
use crate::types::{Interval, TradeAction};

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/data/snapshot", get(snapshot))
        .route("/api/v1/data/klines/:symbol", get(klines))
        .route("/api/v1/data/signals", post(create_signal))
        .route("/api/v1/data/signals", get(list_signals))
        .route("/api/v1/ta/analyze", post(ta_analyze))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// GET /api/v1/data/snapshot
// =============================================================================

#[derive(Serialize)]
struct SnapshotResponse {
    generated_at: i64,
    markets: Vec<crate::store::market_cache::MarketCacheEntry>,
    btc_price: Option<f64>,
    eth_price: Option<f64>,
    macro: crate::market_data_service::MacroBundle,
    data_freshness: HashMap<String, i64>,
}

/// Watch-set tickers (from `market_cache`, refreshed by the
/// `market_cache_refresh` job) plus the macro/on-chain bundle and a
/// per-source freshness map (seconds since each source last updated).
async fn snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (btc_price, eth_price, macro_bundle) = state.market_data.snapshot_bundle().await;

    let symbols = state.runtime_config.read().symbols.clone();
    let mut markets = Vec::with_capacity(symbols.len());
    let mut data_freshness = HashMap::new();
    let now = chrono::Utc::now().timestamp_millis();

    for symbol in &symbols {
        if let Ok(Some(entry)) = state.store.get_market_cache(symbol) {
            data_freshness.insert(symbol.clone(), now - entry.updated_at_ms);
            markets.push(entry);
        }
    }
    // Every macro/on-chain tag in the monitor was just fetched live as part
    // of `snapshot_bundle` above, so a successful entry is ~0ms stale.
    for (tag, health) in state.market_data.monitor_snapshot() {
        if health.last_success {
            data_freshness.insert(tag, 0);
        }
    }

    Json(SnapshotResponse {
        generated_at: now,
        markets,
        btc_price,
        eth_price,
        macro: macro_bundle,
        data_freshness,
    })
}

// =============================================================================
// GET /api/v1/data/klines/:symbol
// =============================================================================

#[derive(Deserialize)]
struct KlinesQuery {
    timeframe: Option<String>,
    limit: Option<u32>,
    skip_sync: Option<bool>,
}

async fn klines(
    State(state): State<Arc<AppState>>,
    axum::extract::Path(symbol): axum::extract::Path<String>,
    Query(query): Query<KlinesQuery>,
) -> impl IntoResponse {
    let timeframe = query.timeframe.as_deref().unwrap_or("1h");
    let interval: Interval = match timeframe.parse() {
        Ok(iv) => iv,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("unknown timeframe '{timeframe}'") })),
            )
                .into_response()
        }
    };

    let limit = query.limit.unwrap_or(200).min(1000);
    let sync_first = !query.skip_sync.unwrap_or(false);

    let bars = if sync_first {
        if let Err(e) = state.kline_sync.sync_one(&symbol, interval).await {
            warn!(symbol, %interval, error = %e, "kline sync failed, serving existing data");
        }
        state.store.select_bars(&symbol, interval, limit)
    } else {
        state.store.select_bars(&symbol, interval, limit)
    };

    match bars {
        Ok(bars) => Json(serde_json::json!({ "symbol": symbol, "timeframe": timeframe, "bars": bars })).into_response(),
        Err(e) => {
            warn!(symbol, error = %e, "failed to read klines");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": "store read failed" }))).into_response()
        }
    }
}

// =============================================================================
// POST /api/v1/data/signals
// =============================================================================

#[derive(Deserialize)]
struct CreateSignalRequest {
    symbol: String,
    action: String,
    agent_id: Option<String>,
    strategy_name: Option<String>,
    conviction: Option<f64>,
    price_at_signal: Option<f64>,
    reason: Option<String>,
    raw_analysis: Option<String>,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
}

async fn create_signal(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSignalRequest>,
) -> impl IntoResponse {
    if req.symbol.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "symbol must not be empty" }))).into_response();
    }

    let action: TradeAction = match req.action.parse() {
        Ok(a) => a,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("unknown action '{}': expected BUY, SELL, or HOLD", req.action) })),
            )
                .into_response()
        }
    };

    let signal = AgentSignal {
        id: None,
        agent_id: req.agent_id,
        strategy_name: req.strategy_name,
        symbol: req.symbol,
        action,
        conviction: req.conviction.unwrap_or(0.0),
        price_at_signal: req.price_at_signal,
        reason: req.reason,
        raw_analysis: req.raw_analysis,
        stop_loss: req.stop_loss,
        take_profit: req.take_profit,
        created_at_ms: crate::util::now_ms(),
    };

    match state.store.insert_agent_signal(&signal) {
        Ok(id) => {
            info!(id, symbol = %signal.symbol, action = %signal.action, "agent signal recorded");
            (StatusCode::CREATED, Json(serde_json::json!({ "id": id }))).into_response()
        }
        Err(e) => {
            warn!(error = %e, "failed to persist agent signal");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": "store write failed" }))).into_response()
        }
    }
}

// =============================================================================
// GET /api/v1/data/signals
// =============================================================================

#[derive(Deserialize)]
struct ListSignalsQuery {
    symbol: Option<String>,
    limit: Option<u32>,
}

async fn list_signals(State(state): State<Arc<AppState>>, Query(query): Query<ListSignalsQuery>) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50).min(500);
    match state.store.list_agent_signals(query.symbol.as_deref(), limit) {
        Ok(signals) => Json(signals).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to list agent signals");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": "store read failed" }))).into_response()
        }
    }
}

// =============================================================================
// POST /api/v1/ta/analyze
// =============================================================================

#[derive(Deserialize)]
struct TaAnalyzeRequest {
    symbol: String,
    timeframes: Option<Vec<String>>,
    klines_limit: Option<u32>,
    buy_threshold: Option<f64>,
    sell_threshold: Option<f64>,
    atr_stop_mult: Option<f64>,
    atr_target_mult: Option<f64>,
}

async fn ta_analyze(State(state): State<Arc<AppState>>, Json(req): Json<TaAnalyzeRequest>) -> impl IntoResponse {
    if req.symbol.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "symbol must not be empty" }))).into_response();
    }

    let tf_tokens = req.timeframes.unwrap_or_else(|| {
        state.runtime_config.read().ta_params.timeframe_weights.keys().cloned().collect()
    });

    let mut tfs = Vec::with_capacity(tf_tokens.len());
    for token in &tf_tokens {
        match token.parse::<Interval>() {
            Ok(iv) => tfs.push(iv),
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": format!("unknown timeframe '{token}'") })),
                )
                    .into_response()
            }
        }
    }

    let limit = req.klines_limit.unwrap_or_else(|| state.runtime_config.read().ta_params.klines_limit);
    let tf_bars: HashMap<Interval, Vec<_>> = state.kline_sync.get_multi_timeframe(&req.symbol, &tfs, limit, true).await;

    let live_price = state.market_data.spot_price_or_cached(&req.symbol).await;
    let overrides = crate::ta_strategy::AnalyzeOverrides {
        buy_threshold: req.buy_threshold,
        sell_threshold: req.sell_threshold,
        atr_stop_mult: req.atr_stop_mult,
        atr_target_mult: req.atr_target_mult,
    };
    let result = state.ta_strategy.analyze_with_overrides(&req.symbol, &tf_bars, live_price, &overrides);

    Json(result).into_response()
}
