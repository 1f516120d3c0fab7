// =============================================================================
// K-line Sync Engine (C3) — backfill, incremental sync, multi-timeframe read
// =============================================================================
//
// Owns all acquisition of OHLCV history. Two entry points converge on the
// same upsert path:
//
//   - `backfill`: first-time acquisition when the store holds nothing yet
//     for `(symbol, interval)`. Walks forward from `now - lookback` in
//     batches of up to 1000 bars.
//   - `incremental`: acquisition for a symbol/interval pair that already has
//     history. Fetches from `last_open_time + 1` and drops the final
//     returned bar, since it may be the still-open current candle.
//
// `get_multi_timeframe` is the shared read path used by both the API layer
// and the TA strategy: it runs sync (if requested) then a store read,
// strictly serially per `(symbol, tf)` — the store's single `Mutex<Connection>`
// already forbids concurrent use, but the serial loop here is what keeps a
// multi-tf caller from seeing a partially-synced tail.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{instrument, warn};

use crate::binance::client::ExchangeClient;
use crate::rate_limit::RateLimiter;
use crate::store::bars::Bar;
use crate::store::Store;
use crate::types::Interval;
use crate::util::now_ms;

/// Binance (and most exchange REST APIs) cap a single klines response at
/// 1000 rows.
const FETCH_LIMIT: u32 = 1000;
/// Extra pause between backfill batches, on top of the rate limiter, so a
/// burst of concurrent backfills across symbols doesn't hammer the mirror.
const BATCH_PAUSE: Duration = Duration::from_millis(300);
/// Pause between `(symbol, tf)` pairs inside one multi-tf read.
const TF_PAUSE: Duration = Duration::from_millis(200);
/// Pause between symbols when a caller walks the whole watch set.
const SYMBOL_PAUSE: Duration = Duration::from_millis(500);

/// Outcome of a single `(symbol, interval)` sync attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOutcome {
    pub inserted: usize,
    pub last_open_time_ms: Option<i64>,
}

pub struct KlineSyncEngine {
    store: Arc<Store>,
    exchange: Arc<ExchangeClient>,
    limiter: Arc<RateLimiter>,
}

impl KlineSyncEngine {
    pub fn new(store: Arc<Store>, exchange: Arc<ExchangeClient>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            store,
            exchange,
            limiter,
        }
    }

    /// Sync one `(symbol, interval)` pair: backfill if nothing is stored
    /// yet, otherwise incremental.
    #[instrument(skip(self), fields(symbol, %interval))]
    pub async fn sync_one(&self, symbol: &str, interval: Interval) -> anyhow::Result<SyncOutcome> {
        match self.store.latest_open_time(symbol, interval)? {
            None => self.backfill(symbol, interval).await,
            Some(last_open) => self.incremental(symbol, interval, last_open).await,
        }
    }

    /// First-time full-history acquisition. Loops fetching up to
    /// `FETCH_LIMIT` bars at a time, advancing the cursor to
    /// `last.close_time_ms + 1`, until the upstream returns fewer than a
    /// full batch or the cursor catches up to now.
    async fn backfill(&self, symbol: &str, interval: Interval) -> anyhow::Result<SyncOutcome> {
        let lookback_ms = interval.initial_lookback_bars() * interval.millis();
        let mut cursor = now_ms() - lookback_ms;
        let mut total_inserted = 0usize;

        loop {
            let _permit = self.limiter.acquire().await;
            let bars = self
                .exchange
                .fetch_klines(symbol, interval, Some(cursor), FETCH_LIMIT)
                .await?;

            if bars.is_empty() {
                break;
            }

            let returned = bars.len();
            let last_close = bars[returned - 1].close_time_ms;
            total_inserted += self.store.insert_bars_ignore_conflict(&bars)?;
            cursor = last_close + 1;

            if (returned as u32) < FETCH_LIMIT || cursor >= now_ms() {
                break;
            }

            tokio::time::sleep(BATCH_PAUSE).await;
        }

        let last_open_time_ms = self.store.latest_open_time(symbol, interval)?;
        Ok(SyncOutcome {
            inserted: total_inserted,
            last_open_time_ms,
        })
    }

    /// Fetch only bars newer than `last_open`. The final bar returned by the
    /// exchange may still be the open (not-yet-closed) candle, so it is
    /// always dropped before the upsert — the store only ever contains
    /// closed bars.
    async fn incremental(
        &self,
        symbol: &str,
        interval: Interval,
        last_open: i64,
    ) -> anyhow::Result<SyncOutcome> {
        let start_ms = last_open + 1;

        let _permit = self.limiter.acquire().await;
        let mut bars = self
            .exchange
            .fetch_klines(symbol, interval, Some(start_ms), FETCH_LIMIT)
            .await?;

        if bars.is_empty() {
            return Ok(SyncOutcome {
                inserted: 0,
                last_open_time_ms: Some(last_open),
            });
        }

        bars.pop(); // drop the (possibly still-open) most recent candle

        let inserted = self.store.insert_bars_ignore_conflict(&bars)?;
        let last_open_time_ms = self.store.latest_open_time(symbol, interval)?;
        Ok(SyncOutcome {
            inserted,
            last_open_time_ms,
        })
    }

    /// Read `limit` bars across each of `tfs` for one symbol, chronological
    /// order. Runs `(symbol, tf)` sync (when `sync_first`) strictly before
    /// the read for that same tf, and the tf loop itself is serial — never
    /// parallelized onto the shared store handle.
    ///
    /// A sync failure for one tf is logged and counted, but the read still
    /// happens against whatever the store already holds; the returned map
    /// never aborts early because of a single failed tf.
    #[instrument(skip(self, tfs), fields(symbol))]
    pub async fn get_multi_timeframe(
        &self,
        symbol: &str,
        tfs: &[Interval],
        limit: u32,
        sync_first: bool,
    ) -> HashMap<Interval, Vec<Bar>> {
        let mut out = HashMap::with_capacity(tfs.len());

        for (i, &tf) in tfs.iter().enumerate() {
            if sync_first {
                if let Err(e) = self.sync_one(symbol, tf).await {
                    warn!(symbol, %tf, error = %e, "kline sync failed for timeframe, serving existing data");
                }
            }

            let bars = self.store.select_bars(symbol, tf, limit).unwrap_or_else(|e| {
                warn!(symbol, %tf, error = %e, "failed to read bars after sync");
                Vec::new()
            });
            out.insert(tf, bars);

            if i + 1 < tfs.len() {
                tokio::time::sleep(TF_PAUSE).await;
            }
        }

        out
    }

    /// Walk an entire watch set × timeframe grid, incremental-syncing each
    /// pair. Used by the scheduler's `klines_incremental_sync` job. A
    /// 500ms pause separates symbols (on top of the per-tf pause inside
    /// each symbol's own multi-tf loop) to bound burst load across the
    /// whole grid.
    pub async fn sync_watch_set(&self, symbols: &[String], tfs: &[Interval]) {
        for (i, symbol) in symbols.iter().enumerate() {
            let _ = self.get_multi_timeframe(symbol, tfs, 1, true).await;
            if i + 1 < symbols.len() {
                tokio::time::sleep(SYMBOL_PAUSE).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> KlineSyncEngine {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let exchange = Arc::new(ExchangeClient::new(
            "https://api.binance.com",
            "https://data-api.binance.vision",
        ));
        let limiter = Arc::new(RateLimiter::new(1000.0, 1000, 3));
        KlineSyncEngine::new(store, exchange, limiter)
    }

    #[tokio::test]
    async fn get_multi_timeframe_without_sync_reads_empty_from_empty_store() {
        let engine = engine();
        let out = engine
            .get_multi_timeframe("BTCUSDT", &[Interval::H1, Interval::H4], 10, false)
            .await;
        assert_eq!(out.len(), 2);
        assert!(out[&Interval::H1].is_empty());
        assert!(out[&Interval::H4].is_empty());
    }

    #[tokio::test]
    async fn incremental_drops_final_bar_guard_holds_on_single_bar_batch() {
        // A batch of exactly one returned bar must never be upserted: it is
        // always the (possibly open) most recent candle.
        let engine = engine();
        let bar = Bar {
            symbol: "BTCUSDT".into(),
            interval: Interval::H1,
            open_time_ms: 0,
            close_time_ms: Interval::H1.millis() - 1,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        };
        engine.store.insert_bars_ignore_conflict(&[bar]).unwrap();
        // incremental() itself requires network; this only asserts the pop
        // semantics a unit test can exercise directly.
        let mut batch = vec![bar_at(1_000), bar_at(2_000)];
        batch.pop();
        assert_eq!(batch.len(), 1);
    }

    fn bar_at(open_time_ms: i64) -> Bar {
        Bar {
            symbol: "BTCUSDT".into(),
            interval: Interval::H1,
            open_time_ms,
            close_time_ms: open_time_ms + Interval::H1.millis() - 1,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        }
    }
}
