// =============================================================================
// Central Application State — Market Data Core
// =============================================================================
//
// The single source of truth tying together the store, the exchange/macro/
// sentiment/on-chain collectors, the K-line sync engine, the market data
// service, the TA strategy, and the scheduler. All subsystems are
// constructed once in `AppState::new` and handed out as `Arc` clones to the
// API layer and the scheduler's background jobs.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use crate::binance::client::ExchangeClient;
use crate::collectors::etf_onchain::EtfOnchainClient;
use crate::collectors::macro_client::MacroClient;
use crate::collectors::onchain::OnChainClients;
use crate::collectors::sentiment::SentimentClient;
use crate::collectors::spiders::{BrowserPool, Spider};
use crate::collectors::stablecoin::StablecoinClient;
use crate::kline_sync::KlineSyncEngine;
use crate::market_data_service::MarketDataService;
use crate::rate_limit::RateLimiter;
use crate::runtime_config::RuntimeConfig;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::ta_strategy::TaStrategy;

/// A recorded error event for operational visibility. Kept as a bounded
/// ring buffer — same shape as the original engine's error log, just
/// scoped to this service's own failure modes (collector errors, sync
/// failures) rather than execution/risk events.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub code: Option<String>,
    pub at: String,
}

const MAX_RECENT_ERRORS: usize = 50;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    pub store: Arc<Store>,
    pub exchange: Arc<ExchangeClient>,
    pub rate_limiter: Arc<RateLimiter>,

    pub macro_client: Arc<MacroClient>,
    pub sentiment: Arc<SentimentClient>,
    pub stablecoin: Arc<StablecoinClient>,
    pub onchain: Arc<OnChainClients>,
    pub etf_onchain: Arc<EtfOnchainClient>,
    pub browser_pool: Arc<BrowserPool>,

    pub kline_sync: Arc<KlineSyncEngine>,
    pub market_data: Arc<MarketDataService>,
    pub ta_strategy: Arc<TaStrategy>,
    pub scheduler: Arc<Scheduler>,

    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig, store: Store) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(store);

        let exchange = Arc::new(ExchangeClient::new(
            config.exchange_base_url.clone(),
            config.exchange_kline_base_url.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::from_params(
            config.rate_limit.max_rate,
            config.rate_limit.burst,
            config.rate_limit.kline_concurrency,
        ));

        let macro_client = Arc::new(MacroClient::new(std::env::var("FRED_API_KEY").unwrap_or_default()));
        let sentiment = Arc::new(SentimentClient::new());
        let stablecoin = Arc::new(StablecoinClient::new());
        let onchain = Arc::new(OnChainClients::new());
        let etf_onchain = Arc::new(EtfOnchainClient::new(Duration::from_millis(
            config.rate_limit.etf_lookup_spacing_ms,
        )));
        let browser_pool = Arc::new(BrowserPool::new());

        let kline_sync = Arc::new(KlineSyncEngine::new(store.clone(), exchange.clone(), rate_limiter.clone()));
        let market_data = Arc::new(MarketDataService::new(
            store.clone(),
            exchange.clone(),
            macro_client.clone(),
            sentiment.clone(),
            stablecoin.clone(),
            onchain.clone(),
            etf_onchain.clone(),
        ));
        let ta_strategy = Arc::new(TaStrategy::new(config.clone()));

        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            market_data.clone(),
            kline_sync.clone(),
            config.clone(),
            browser_pool.clone(),
        ));

        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new((*config).clone())),
            store,
            exchange,
            rate_limiter,
            macro_client,
            sentiment,
            stablecoin,
            onchain,
            etf_onchain,
            browser_pool,
            kline_sync,
            market_data,
            ta_strategy,
            scheduler,
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    /// The registered spiders the scheduler's `crawler_check` job walks each
    /// tick. Returns an empty set until real upstream pages are configured —
    /// `FlowPageSpider` is a pluggable shape, not hard-wired to a live URL.
    pub fn spiders(&self) -> Vec<Arc<dyn Spider>> {
        Vec::new()
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    pub fn push_error(&self, msg: String) {
        self.push_error_with_code(msg, None);
    }

    pub fn push_error_with_code(&self, msg: String, code: Option<String>) {
        let mut errors = self.recent_errors.write();
        errors.push(ErrorRecord {
            message: msg,
            code,
            at: chrono::Utc::now().to_rfc3339(),
        });
        if errors.len() > MAX_RECENT_ERRORS {
            let excess = errors.len() - MAX_RECENT_ERRORS;
            errors.drain(0..excess);
        }
    }
}
