// =============================================================================
// Scheduler (C6) — single event loop, job dedup, spider supervision
// =============================================================================
//
// One cooperative `tokio::time::interval` tick per job, following the
// teacher's own loop shape (`tokio::spawn` + `interval.tick().await` per
// concern) rather than pulling in a cron crate. Every job checks a shared
// `running: HashSet<String>` guard before firing so a slow run is never
// doubled up by the next tick (`max_instances=1`, "skip if already running"
// semantics).
//
// Spiders are supervised separately: each run gets its own page from the
// shared `BrowserPool`, is wrapped in a hard `SPIDER_TIMEOUT`, and its
// outcome is appended to an in-memory `CrawlRunLog` ring buffer for
// operational visibility. The log is not persisted — a restart starts it
// empty.
// =============================================================================

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::collectors::spiders::{BrowserPool, Spider, SPIDER_TIMEOUT};
use crate::kline_sync::KlineSyncEngine;
use crate::market_data_service::MarketDataService;
use crate::runtime_config::RuntimeConfig;
use crate::store::Store;
use crate::types::Interval;

const MARKET_CACHE_REFRESH_PERIOD: Duration = Duration::from_secs(60);
const KLINES_INCREMENTAL_SYNC_PERIOD: Duration = Duration::from_secs(15 * 60);
const CRAWLER_CHECK_PERIOD: Duration = Duration::from_secs(5 * 60);
const PORTFOLIO_SNAPSHOT_PERIOD: Duration = Duration::from_secs(60 * 60);
const FLUSH_RISK_EVENTS_PERIOD: Duration = Duration::from_secs(5 * 60);

/// How many completed runs the in-memory crawl log retains before it starts
/// dropping the oldest entry.
const CRAWL_LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
pub struct CrawlRunRecord {
    pub data_type: String,
    pub started_at_ms: i64,
    pub duration_ms: u64,
    pub item_count: usize,
    pub error: Option<String>,
}

/// Bounded, in-memory ring buffer of spider run outcomes. Deliberately not
/// persisted — this is operational visibility, not an audit trail.
#[derive(Default)]
pub struct CrawlRunLog {
    records: Mutex<VecDeque<CrawlRunRecord>>,
}

impl CrawlRunLog {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(CRAWL_LOG_CAPACITY)),
        }
    }

    fn push(&self, record: CrawlRunRecord) {
        let mut records = self.records.lock();
        if records.len() == CRAWL_LOG_CAPACITY {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn recent(&self, limit: usize) -> Vec<CrawlRunRecord> {
        let records = self.records.lock();
        records.iter().rev().take(limit).cloned().collect()
    }
}

/// Guards against overlapping runs of the same job — a tick that finds its
/// job already marked running is skipped entirely rather than queued.
#[derive(Default)]
struct RunningGuard {
    running: Mutex<HashSet<&'static str>>,
}

impl RunningGuard {
    fn try_enter(&self, job: &'static str) -> bool {
        self.running.lock().insert(job)
    }

    fn leave(&self, job: &'static str) {
        self.running.lock().remove(job);
    }
}

pub struct Scheduler {
    store: Arc<Store>,
    market_data: Arc<MarketDataService>,
    kline_sync: Arc<KlineSyncEngine>,
    config: Arc<RuntimeConfig>,
    browser_pool: Arc<BrowserPool>,
    crawl_log: Arc<CrawlRunLog>,
    guard: Arc<RunningGuard>,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        market_data: Arc<MarketDataService>,
        kline_sync: Arc<KlineSyncEngine>,
        config: Arc<RuntimeConfig>,
        browser_pool: Arc<BrowserPool>,
    ) -> Self {
        Self {
            store,
            market_data,
            kline_sync,
            config,
            browser_pool,
            crawl_log: Arc::new(CrawlRunLog::new()),
            guard: Arc::new(RunningGuard::default()),
        }
    }

    pub fn crawl_log(&self) -> Arc<CrawlRunLog> {
        self.crawl_log.clone()
    }

    /// Register and start the five default jobs. Each runs in its own
    /// `tokio::spawn`'d loop, independent of the others — a slow or failing
    /// job never blocks a sibling's tick.
    pub fn start(self: &Arc<Self>, spiders: Vec<Arc<dyn Spider>>) {
        self.spawn_market_cache_refresh();
        self.spawn_klines_incremental_sync();
        self.spawn_crawler_check(spiders);
        self.spawn_portfolio_snapshot();
        self.spawn_flush_risk_events();
    }

    fn spawn_market_cache_refresh(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MARKET_CACHE_REFRESH_PERIOD);
            loop {
                interval.tick().await;
                this.run_guarded("market_cache_refresh", || this.market_cache_refresh()).await;
            }
        });
    }

    fn spawn_klines_incremental_sync(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(KLINES_INCREMENTAL_SYNC_PERIOD);
            loop {
                interval.tick().await;
                this.run_guarded("klines_incremental_sync", || this.klines_incremental_sync()).await;
            }
        });
    }

    fn spawn_crawler_check(self: &Arc<Self>, spiders: Vec<Arc<dyn Spider>>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CRAWLER_CHECK_PERIOD);
            loop {
                interval.tick().await;
                let spiders = spiders.clone();
                this.run_guarded("crawler_check", || this.crawler_check(spiders)).await;
            }
        });
    }

    fn spawn_portfolio_snapshot(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PORTFOLIO_SNAPSHOT_PERIOD);
            loop {
                interval.tick().await;
                this.run_guarded("portfolio_snapshot", || this.portfolio_snapshot()).await;
            }
        });
    }

    fn spawn_flush_risk_events(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(FLUSH_RISK_EVENTS_PERIOD);
            loop {
                interval.tick().await;
                this.run_guarded("flush_risk_events", || this.flush_risk_events()).await;
            }
        });
    }

    /// `replace_existing` + `max_instances=1`: if the previous tick's run of
    /// `job` hasn't finished yet, this tick is dropped silently (logged at
    /// debug volume) instead of stacking up a second concurrent run.
    async fn run_guarded<F, Fut>(&self, job: &'static str, f: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        if !self.guard.try_enter(job) {
            warn!(job, "previous run still in progress, skipping this tick");
            return;
        }
        f().await;
        self.guard.leave(job);
    }

    async fn market_cache_refresh(&self) {
        for symbol in &self.config.symbols {
            if self.market_data.refresh_market_cache(symbol).await.is_none() {
                warn!(symbol, "market cache refresh could not obtain a 24h ticker");
            }
        }
    }

    async fn klines_incremental_sync(&self) {
        let tfs = [Interval::M15, Interval::H1, Interval::H4];
        self.kline_sync.sync_watch_set(&self.config.symbols, &tfs).await;
    }

    /// Runs every registered spider once per tick, each under its own
    /// borrowed page and hard timeout. A spider that times out or errors is
    /// logged and recorded in the crawl log; it never aborts the others.
    async fn crawler_check(&self, spiders: Vec<Arc<dyn Spider>>) {
        for spider in spiders {
            let started_at_ms = crate::util::now_ms();
            let started = std::time::Instant::now();
            let page = self.browser_pool.acquire_page().await;

            let outcome = tokio::time::timeout(SPIDER_TIMEOUT, spider.run(page)).await;

            let record = match outcome {
                Ok(Ok(rows)) => {
                    let item_count = rows.len();
                    for row in rows {
                        if let Err(e) = self.store.insert_crawled_if_absent(
                            &row.data_type,
                            &row.date,
                            row.value,
                            row.raw.as_deref(),
                        ) {
                            error!(data_type = %row.data_type, error = %e, "failed to persist crawled datum");
                        }
                    }
                    CrawlRunRecord {
                        data_type: spider.data_type().to_string(),
                        started_at_ms,
                        duration_ms: started.elapsed().as_millis() as u64,
                        item_count,
                        error: None,
                    }
                }
                Ok(Err(e)) => {
                    warn!(data_type = spider.data_type(), error = %e, "spider run failed");
                    CrawlRunRecord {
                        data_type: spider.data_type().to_string(),
                        started_at_ms,
                        duration_ms: started.elapsed().as_millis() as u64,
                        item_count: 0,
                        error: Some(e.to_string()),
                    }
                }
                Err(_) => {
                    warn!(data_type = spider.data_type(), "spider run exceeded hard timeout, cancelled");
                    CrawlRunRecord {
                        data_type: spider.data_type().to_string(),
                        started_at_ms,
                        duration_ms: started.elapsed().as_millis() as u64,
                        item_count: 0,
                        error: Some("timed out".to_string()),
                    }
                }
            };

            self.crawl_log.push(record);
        }
    }

    /// Stub: no portfolio/position concept exists in this service; kept as
    /// a registered no-op job so the job grid matches the original
    /// five-job schedule rather than silently dropping a slot.
    async fn portfolio_snapshot(&self) {
        info!("portfolio_snapshot tick (no-op: no position tracking in this service)");
    }

    /// Stub: no risk-event queue exists in this service; see
    /// `portfolio_snapshot` for why the slot is kept rather than removed.
    async fn flush_risk_events(&self) {
        info!("flush_risk_events tick (no-op: no risk-event queue in this service)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_guard_rejects_reentry_until_left() {
        let guard = RunningGuard::default();
        assert!(guard.try_enter("job_a"));
        assert!(!guard.try_enter("job_a"));
        guard.leave("job_a");
        assert!(guard.try_enter("job_a"));
    }

    #[test]
    fn crawl_log_caps_at_capacity_and_returns_newest_first() {
        let log = CrawlRunLog::new();
        for i in 0..(CRAWL_LOG_CAPACITY + 10) {
            log.push(CrawlRunRecord {
                data_type: format!("tag-{i}"),
                started_at_ms: i as i64,
                duration_ms: 1,
                item_count: 0,
                error: None,
            });
        }
        let recent = log.recent(5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].data_type, format!("tag-{}", CRAWL_LOG_CAPACITY + 9));
    }

    #[tokio::test]
    async fn run_guarded_skips_when_already_running() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let exchange = Arc::new(crate::binance::client::ExchangeClient::new(
            "https://api.binance.com",
            "https://data-api.binance.vision",
        ));
        let config = Arc::new(RuntimeConfig::default());
        let market_data = Arc::new(MarketDataService::new(
            store.clone(),
            exchange.clone(),
            Arc::new(crate::collectors::macro_client::MacroClient::new("")),
            Arc::new(crate::collectors::sentiment::SentimentClient::new()),
            Arc::new(crate::collectors::stablecoin::StablecoinClient::new()),
            Arc::new(crate::collectors::onchain::OnChainClients::new()),
            Arc::new(crate::collectors::etf_onchain::EtfOnchainClient::new(Duration::from_millis(1))),
        ));
        let limiter = Arc::new(crate::rate_limit::RateLimiter::from_params(
            config.rate_limit.max_rate,
            config.rate_limit.burst,
            config.rate_limit.kline_concurrency,
        ));
        let kline_sync = Arc::new(KlineSyncEngine::new(store.clone(), exchange, limiter));
        let scheduler = Arc::new(Scheduler::new(
            store,
            market_data,
            kline_sync,
            config,
            Arc::new(BrowserPool::new()),
        ));

        assert!(scheduler.guard.try_enter("probe"));
        let ran = Arc::new(Mutex::new(false));
        let ran2 = ran.clone();
        scheduler
            .run_guarded("probe", || async move {
                *ran2.lock() = true;
            })
            .await;
        assert!(!*ran.lock(), "job body must not run while already marked running");
        scheduler.guard.leave("probe");
    }
}
