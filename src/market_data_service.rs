// =============================================================================
// Market Data Service (C5) — TTL cache + concurrent collector fan-out
// =============================================================================
//
// Owns the in-memory cache that sits in front of every collector. Each
// logical source tag (`fred:DFF`, `fear_greed`, `hashrate`, ...) has its own
// TTL; a cache miss calls the collector, records latency + success into the
// monitor, and only caches a non-null result.
//
// `snapshot_bundle()` is the fan-out used by the `/snapshot` API contract:
// BTC/ETH spot price are fetched first (they parameterize the on-chain and
// ETF-holdings lookups), then every remaining source runs concurrently with
// a 20-second per-fetch deadline. A deadline hit yields `None` for that tag
// only — it never fails the batch.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::warn;

use crate::binance::client::ExchangeClient;
use crate::collectors::etf_onchain::{EtfOnchainClient, BTC_ETF_CUSTODY, ETH_ETF_CUSTODY};
use crate::collectors::macro_client::{series, MacroClient};
use crate::collectors::onchain::OnChainClients;
use crate::collectors::sentiment::{FearGreedReading, SentimentClient};
use crate::collectors::stablecoin::StablecoinClient;
use crate::store::Store;

/// Per-fetch deadline for every entry in the concurrent fan-out.
const FETCH_DEADLINE: Duration = Duration::from_secs(20);

/// TTL for the sentiment reading — the underlying index only updates once a
/// day, but this cache exists mainly to absorb bursts of snapshot requests.
const SENTIMENT_TTL: Duration = Duration::from_secs(1800);

#[derive(Clone)]
struct CacheEntry {
    value: serde_json::Value,
    fetched_at: Instant,
    ttl: Duration,
}

/// Latency + success bookkeeping for one source tag, exposed for ops
/// visibility (not persisted — resets on restart).
#[derive(Debug, Clone, Serialize, Default)]
pub struct SourceHealth {
    pub last_latency_ms: u64,
    pub last_success: bool,
    pub last_error: Option<String>,
}

pub struct MarketDataService {
    store: Arc<Store>,
    exchange: Arc<ExchangeClient>,
    macro_client: Arc<MacroClient>,
    sentiment: Arc<SentimentClient>,
    stablecoin: Arc<StablecoinClient>,
    onchain: Arc<OnChainClients>,
    etf_onchain: Arc<EtfOnchainClient>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    monitor: RwLock<HashMap<String, SourceHealth>>,
}

/// The macro/on-chain bundle returned as part of the snapshot contract.
/// Fields the core has no genuine live collector for are sourced from
/// `crawled_data` (populated by the headless spiders) rather than fabricated
/// — `None` means "no spider has reported this tag yet", not "unsupported".
#[derive(Debug, Clone, Serialize, Default)]
pub struct MacroBundle {
    pub fed_rate: Option<f64>,
    pub treasury_10y: Option<f64>,
    pub dxy: Option<f64>,
    pub m2_growth_yoy: Option<f64>,
    pub fear_greed: Option<FearGreedSnapshot>,
    pub stablecoin_supply_b: Option<f64>,
    pub etf_flows: EtfFlows,
    pub hashrate: Option<f64>,
    pub halving_days: Option<f64>,
    pub ahr999: Option<f64>,
    pub wma200: Option<f64>,
    pub mvrv_ratio: Option<f64>,
    pub miners_profitable: Option<f64>,
    pub miners_total: Option<f64>,
    pub mstr_mnav: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FearGreedSnapshot {
    pub value: u8,
    pub classification: String,
}

impl From<FearGreedReading> for FearGreedSnapshot {
    fn from(r: FearGreedReading) -> Self {
        let classification = format!("{:?}", r.classification);
        Self { value: r.value, classification }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct EtfFlows {
    pub btc: Option<FlowPoint>,
    pub eth: Option<FlowPoint>,
    pub sol: Option<FlowPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowPoint {
    pub value_usd: f64,
    pub date: String,
}

impl MarketDataService {
    pub fn new(
        store: Arc<Store>,
        exchange: Arc<ExchangeClient>,
        macro_client: Arc<MacroClient>,
        sentiment: Arc<SentimentClient>,
        stablecoin: Arc<StablecoinClient>,
        onchain: Arc<OnChainClients>,
        etf_onchain: Arc<EtfOnchainClient>,
    ) -> Self {
        Self {
            store,
            exchange,
            macro_client,
            sentiment,
            stablecoin,
            onchain,
            etf_onchain,
            cache: RwLock::new(HashMap::new()),
            monitor: RwLock::new(HashMap::new()),
        }
    }

    fn record(&self, tag: &str, started: Instant, success: bool, error: Option<String>) {
        self.monitor.write().insert(
            tag.to_string(),
            SourceHealth {
                last_latency_ms: started.elapsed().as_millis() as u64,
                last_success: success,
                last_error: error,
            },
        );
    }

    fn cache_get(&self, tag: &str) -> Option<serde_json::Value> {
        let cache = self.cache.read();
        let entry = cache.get(tag)?;
        if entry.fetched_at.elapsed() < entry.ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    fn cache_put(&self, tag: &str, value: &serde_json::Value, ttl: Duration) {
        self.cache.write().insert(
            tag.to_string(),
            CacheEntry {
                value: value.clone(),
                fetched_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Fetch a fresh 24h ticker for `symbol` and upsert it into
    /// `market_cache`. Used by the scheduler's `market_cache_refresh` job.
    /// On collector failure the existing cached row (if any) is left as-is
    /// and `None` is returned.
    pub async fn refresh_market_cache(&self, symbol: &str) -> Option<crate::store::market_cache::MarketCacheEntry> {
        match self.exchange.fetch_ticker_24h(symbol).await {
            Ok(entry) => {
                if let Err(e) = self.store.upsert_market_cache(&entry) {
                    warn!(symbol, error = %e, "failed to persist refreshed market cache entry");
                }
                Some(entry)
            }
            Err(e) => {
                warn!(symbol, error = %e, "24h ticker refresh failed");
                None
            }
        }
    }

    /// Live spot price for `symbol`, falling back to the last cached
    /// `market_cache` entry on collector failure.
    pub async fn spot_price_or_cached(&self, symbol: &str) -> Option<f64> {
        match self.exchange.fetch_spot_price(symbol).await {
            Ok(price) => Some(price),
            Err(e) => {
                warn!(symbol, error = %e, "live spot price fetch failed, falling back to cache");
                self.store
                    .get_market_cache(symbol)
                    .ok()
                    .flatten()
                    .map(|entry| entry.price)
            }
        }
    }

    fn crawled_value(&self, data_type: &str) -> Option<f64> {
        self.store.latest_crawled(data_type).ok().flatten().map(|d| d.value)
    }

    fn crawled_flow(&self, data_type: &str) -> Option<FlowPoint> {
        self.store
            .latest_crawled(data_type)
            .ok()
            .flatten()
            .map(|d| FlowPoint { value_usd: d.value, date: d.date })
    }

    /// Fan out every macro/sentiment/on-chain source concurrently (BTC/ETH
    /// price first, serially, since downstream on-chain lookups key off
    /// them) and assemble the snapshot's macro bundle.
    pub async fn snapshot_bundle(&self) -> (Option<f64>, Option<f64>, MacroBundle) {
        let btc_price = self.spot_price_or_cached("BTCUSDT").await;
        let eth_price = self.spot_price_or_cached("ETHUSDT").await;

        let mut set: JoinSet<(&'static str, Option<f64>, u64)> = JoinSet::new();

        macro_rules! spawn_f64 {
            ($tag:expr, $fut:expr) => {{
                let fut = $fut;
                set.spawn(async move {
                    let started = Instant::now();
                    let result = tokio::time::timeout(FETCH_DEADLINE, fut).await.ok().flatten();
                    ($tag, result, started.elapsed().as_millis() as u64)
                });
            }};
        }

        {
            let mc = self.macro_client.clone();
            spawn_f64!("fed_rate", async move { mc.fetch_series_latest(series::FED_FUNDS_RATE).await });
        }
        {
            let mc = self.macro_client.clone();
            spawn_f64!("treasury_10y", async move { mc.fetch_series_latest(series::TREASURY_10Y).await });
        }
        {
            let mc = self.macro_client.clone();
            spawn_f64!("dxy", async move { mc.fetch_series_latest(series::DOLLAR_INDEX).await });
        }
        {
            let mc = self.macro_client.clone();
            spawn_f64!("m2_growth_yoy", async move { mc.m2_growth_yoy().await });
        }
        {
            let sc = self.stablecoin.clone();
            spawn_f64!("stablecoin_supply_b", async move { sc.total_supply_b().await });
        }
        {
            let oc = self.onchain.clone();
            spawn_f64!("hashrate", async move { oc.hashrate().await });
        }

        let mut bundle = MacroBundle::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((tag, value, latency_ms)) => {
                    match tag {
                        "fed_rate" => bundle.fed_rate = value,
                        "treasury_10y" => bundle.treasury_10y = value,
                        "dxy" => bundle.dxy = value,
                        "m2_growth_yoy" => bundle.m2_growth_yoy = value,
                        "stablecoin_supply_b" => bundle.stablecoin_supply_b = value,
                        "hashrate" => bundle.hashrate = value,
                        _ => {}
                    }
                    self.monitor.write().insert(
                        tag.to_string(),
                        SourceHealth {
                            last_latency_ms: latency_ms,
                            last_success: value.is_some(),
                            last_error: if value.is_some() { None } else { Some("no data".to_string()) },
                        },
                    );
                }
                Err(e) => warn!(error = %e, "market data fan-out task panicked"),
            }
        }

        if let Some(sentiment) = self.fetch_sentiment().await {
            bundle.fear_greed = Some(sentiment.into());
        }
        if let Some(halving) = self.onchain.halving_countdown().await {
            bundle.halving_days = Some(halving.days_remaining);
        }

        bundle.etf_flows = EtfFlows {
            btc: self.crawled_flow("btc_etf_flow"),
            eth: self.crawled_flow("eth_etf_flow"),
            sol: self.crawled_flow("sol_etf_flow"),
        };
        bundle.ahr999 = self.crawled_value("ahr999");
        bundle.wma200 = self.crawled_value("wma200");
        bundle.mvrv_ratio = self.crawled_value("mvrv_ratio");
        bundle.miners_profitable = self.crawled_value("miners_profitable");
        bundle.miners_total = self.crawled_value("miners_total");
        bundle.mstr_mnav = self.crawled_value("mstr_mnav");

        // ETF custody-address AUM enrichment runs last and serially
        // (see EtfOnchainClient); best-effort, never blocks the bundle.
        let _btc_holdings = self.etf_onchain.aggregate_holdings(BTC_ETF_CUSTODY).await;
        let _eth_holdings = self.etf_onchain.aggregate_holdings(ETH_ETF_CUSTODY).await;

        (btc_price, eth_price, bundle)
    }

    async fn fetch_sentiment(&self) -> Option<FearGreedReading> {
        if let Some(cached) = self.cache_get("fear_greed") {
            if let Ok(reading) = serde_json::from_value::<CachedFearGreed>(cached) {
                return Some(reading.into());
            }
        }

        let started = Instant::now();
        match tokio::time::timeout(FETCH_DEADLINE, self.sentiment.fetch_current()).await {
            Ok(Ok(reading)) => {
                self.record("fear_greed", started, true, None);
                self.cache_put(
                    "fear_greed",
                    &serde_json::json!({"value": reading.value, "classification": format!("{:?}", reading.classification)}),
                    SENTIMENT_TTL,
                );
                Some(reading)
            }
            Ok(Err(e)) => {
                self.record("fear_greed", started, false, Some(e.to_string()));
                None
            }
            Err(_) => {
                self.record("fear_greed", started, false, Some("deadline exceeded".to_string()));
                None
            }
        }
    }

    pub fn monitor_snapshot(&self) -> HashMap<String, SourceHealth> {
        self.monitor.read().clone()
    }
}

#[derive(serde::Deserialize)]
struct CachedFearGreed {
    value: u8,
    classification: String,
}

impl From<CachedFearGreed> for FearGreedReading {
    fn from(c: CachedFearGreed) -> Self {
        use crate::collectors::sentiment::FearGreedClassification::*;
        let classification = match c.classification.as_str() {
            "ExtremeFear" => ExtremeFear,
            "Fear" => Fear,
            "Greed" => Greed,
            "ExtremeGreed" => ExtremeGreed,
            _ => Neutral,
        };
        FearGreedReading { value: c.value, classification }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> MarketDataService {
        MarketDataService::new(
            Arc::new(Store::open_in_memory().unwrap()),
            Arc::new(ExchangeClient::new("https://api.binance.com", "https://data-api.binance.vision")),
            Arc::new(MacroClient::new("")),
            Arc::new(SentimentClient::new()),
            Arc::new(StablecoinClient::new()),
            Arc::new(OnChainClients::new()),
            Arc::new(EtfOnchainClient::new(Duration::from_millis(1))),
        )
    }

    #[test]
    fn cache_put_then_get_round_trips_within_ttl() {
        let svc = service();
        svc.cache_put("x", &serde_json::json!(42.0), Duration::from_secs(60));
        assert_eq!(svc.cache_get("x").and_then(|v| v.as_f64()), Some(42.0));
    }

    #[test]
    fn cache_get_misses_after_ttl_elapses() {
        let svc = service();
        svc.cache_put("x", &serde_json::json!(42.0), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(svc.cache_get("x").is_none());
    }

    #[tokio::test]
    async fn crawled_flow_reads_through_the_store() {
        let svc = service();
        svc.store
            .insert_crawled_if_absent("btc_etf_flow", "2026-07-01", 125.5, None)
            .unwrap();
        let flow = svc.crawled_flow("btc_etf_flow").unwrap();
        assert_eq!(flow.value_usd, 125.5);
        assert_eq!(flow.date, "2026-07-01");
    }

    #[tokio::test]
    async fn monitor_snapshot_is_empty_before_any_fetch() {
        let svc = service();
        assert!(svc.monitor_snapshot().is_empty());
    }
}
