// =============================================================================
// Bar DAO — kline_cache table
// =============================================================================

use anyhow::Result;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::store::Store;
use crate::types::Interval;

/// Immutable OHLCV sample. Never mutated once a closed candle is written;
/// uniqueness is enforced on `(symbol, interval, open_time_ms)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub interval: Interval,
    pub open_time_ms: i64,
    pub close_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Store {
    /// Bulk insert, skipping any row whose `(symbol, interval, open_time)`
    /// already exists. Returns the number of rows actually inserted.
    pub fn insert_bars_ignore_conflict(&self, bars: &[Bar]) -> Result<usize> {
        if bars.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        let now = crate::util::now_ms();

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO kline_cache \
                 (symbol, interval, open_time, close_time, open, high, low, close, volume, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                 ON CONFLICT(symbol, interval, open_time) DO NOTHING",
            )?;

            for bar in bars {
                let changed = stmt.execute(params![
                    bar.symbol,
                    bar.interval.as_str(),
                    bar.open_time_ms,
                    bar.close_time_ms,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    now,
                ])?;
                inserted += changed;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Most recent `open_time_ms` stored for `(symbol, interval)`, if any.
    pub fn latest_open_time(&self, symbol: &str, interval: Interval) -> Result<Option<i64>> {
        let conn = self.conn();
        let result: Option<i64> = conn
            .query_row(
                "SELECT max(open_time) FROM kline_cache WHERE symbol = ?1 AND interval = ?2",
                params![symbol, interval.as_str()],
                |row| row.get(0),
            )
            .unwrap_or(None);
        Ok(result)
    }

    /// The most recent `limit` bars for `(symbol, interval)`, ascending by
    /// `open_time_ms`.
    pub fn select_bars(&self, symbol: &str, interval: Interval, limit: u32) -> Result<Vec<Bar>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT symbol, interval, open_time, close_time, open, high, low, close, volume \
             FROM kline_cache WHERE symbol = ?1 AND interval = ?2 \
             ORDER BY open_time DESC LIMIT ?3",
        )?;

        let rows = stmt.query_map(params![symbol, interval.as_str(), limit], |row| {
            let interval_str: String = row.get(1)?;
            Ok(Bar {
                symbol: row.get(0)?,
                interval: interval_str.parse().unwrap_or(Interval::M1),
                open_time_ms: row.get(2)?,
                close_time_ms: row.get(3)?,
                open: row.get(4)?,
                high: row.get(5)?,
                low: row.get(6)?,
                close: row.get(7)?,
                volume: row.get(8)?,
            })
        })?;

        let mut bars: Vec<Bar> = rows.collect::<rusqlite::Result<_>>()?;
        bars.reverse();
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bar(open_time_ms: i64) -> Bar {
        Bar {
            symbol: "BTCUSDT".into(),
            interval: Interval::H1,
            open_time_ms,
            close_time_ms: open_time_ms + Interval::H1.millis() - 1,
            open: 100.0,
            high: 105.0,
            low: 95.0,
            close: 102.0,
            volume: 10.0,
        }
    }

    #[test]
    fn insert_then_select_returns_ascending_order() {
        let store = Store::open_in_memory().unwrap();
        let bars = vec![sample_bar(3_000), sample_bar(1_000), sample_bar(2_000)];
        let inserted = store.insert_bars_ignore_conflict(&bars).unwrap();
        assert_eq!(inserted, 3);

        let selected = store.select_bars("BTCUSDT", Interval::H1, 10).unwrap();
        assert_eq!(selected.len(), 3);
        assert!(selected[0].open_time_ms < selected[1].open_time_ms);
        assert!(selected[1].open_time_ms < selected[2].open_time_ms);
    }

    #[test]
    fn duplicate_open_time_is_skipped() {
        let store = Store::open_in_memory().unwrap();
        let bar = sample_bar(1_000);
        let first = store.insert_bars_ignore_conflict(&[bar.clone()]).unwrap();
        let second = store.insert_bars_ignore_conflict(&[bar]).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }

    #[test]
    fn latest_open_time_is_none_when_absent() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(
            store.latest_open_time("BTCUSDT", Interval::H1).unwrap(),
            None
        );
    }

    #[test]
    fn latest_open_time_tracks_max() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_bars_ignore_conflict(&[sample_bar(1_000), sample_bar(5_000)])
            .unwrap();
        assert_eq!(
            store.latest_open_time("BTCUSDT", Interval::H1).unwrap(),
            Some(5_000)
        );
    }

    #[test]
    fn select_bars_respects_limit() {
        let store = Store::open_in_memory().unwrap();
        let bars: Vec<Bar> = (0..10).map(|i| sample_bar(i * 1000)).collect();
        store.insert_bars_ignore_conflict(&bars).unwrap();
        let selected = store.select_bars("BTCUSDT", Interval::H1, 3).unwrap();
        assert_eq!(selected.len(), 3);
        // the most recent 3, still ascending
        assert_eq!(selected[2].open_time_ms, 9000);
    }
}
