// =============================================================================
// MarketCacheEntry DAO — market_cache table
// =============================================================================

use anyhow::Result;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::store::Store;
use crate::util::now_ms;

/// Latest 24h ticker snapshot for one symbol. Overwritten on every refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketCacheEntry {
    pub symbol: String,
    pub price: f64,
    pub change_pct_24h: f64,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub updated_at_ms: i64,
}

impl Store {
    /// Insert or overwrite the cached ticker entry for `entry.symbol`.
    pub fn upsert_market_cache(&self, entry: &MarketCacheEntry) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO market_cache (symbol, price, change_pct_24h, high_24h, low_24h, volume_24h, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(symbol) DO UPDATE SET \
                price = excluded.price, \
                change_pct_24h = excluded.change_pct_24h, \
                high_24h = excluded.high_24h, \
                low_24h = excluded.low_24h, \
                volume_24h = excluded.volume_24h, \
                updated_at = excluded.updated_at",
            params![
                entry.symbol,
                entry.price,
                entry.change_pct_24h,
                entry.high_24h,
                entry.low_24h,
                entry.volume_24h,
                entry.updated_at_ms,
            ],
        )?;
        Ok(())
    }

    /// Read the cached ticker entry for `symbol`, if one has been written.
    pub fn get_market_cache(&self, symbol: &str) -> Result<Option<MarketCacheEntry>> {
        let conn = self.conn();
        let entry = conn
            .query_row(
                "SELECT symbol, price, change_pct_24h, high_24h, low_24h, volume_24h, updated_at \
                 FROM market_cache WHERE symbol = ?1",
                params![symbol],
                |row| {
                    Ok(MarketCacheEntry {
                        symbol: row.get(0)?,
                        price: row.get(1)?,
                        change_pct_24h: row.get(2)?,
                        high_24h: row.get(3)?,
                        low_24h: row.get(4)?,
                        volume_24h: row.get(5)?,
                        updated_at_ms: row.get(6)?,
                    })
                },
            )
            .ok();
        Ok(entry)
    }
}

impl MarketCacheEntry {
    pub fn new(symbol: impl Into<String>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            change_pct_24h: 0.0,
            high_24h: None,
            low_24h: None,
            volume_24h: None,
            updated_at_ms: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_then_get_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let entry = MarketCacheEntry {
            symbol: "BTC".into(),
            price: 65000.0,
            change_pct_24h: 1.5,
            high_24h: Some(66000.0),
            low_24h: Some(64000.0),
            volume_24h: Some(1_234.5),
            updated_at_ms: 1_000,
        };
        store.upsert_market_cache(&entry).unwrap();
        let fetched = store.get_market_cache("BTC").unwrap().unwrap();
        assert_eq!(fetched, entry);
    }

    #[test]
    fn upsert_overwrites_existing_row() {
        let store = Store::open_in_memory().unwrap();
        let mut entry = MarketCacheEntry::new("ETH", 3000.0);
        store.upsert_market_cache(&entry).unwrap();

        entry.price = 3100.0;
        entry.updated_at_ms += 1;
        store.upsert_market_cache(&entry).unwrap();

        let fetched = store.get_market_cache("ETH").unwrap().unwrap();
        assert_eq!(fetched.price, 3100.0);
    }

    #[test]
    fn get_missing_symbol_returns_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_market_cache("NOPE").unwrap().is_none());
    }
}
