// =============================================================================
// CrawledDatum DAO — crawled_data table
// =============================================================================

use anyhow::Result;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::store::Store;
use crate::util::now_ms;

/// A typed external observation (macro/sentiment/on-chain/spider output).
/// At most one row exists per `(data_type, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawledDatum {
    pub data_type: String,
    /// Calendar day the value refers to, `YYYY-MM-DD`.
    pub date: String,
    pub value: f64,
    pub raw: Option<String>,
    pub created_at_ms: i64,
}

impl Store {
    /// Insert a new observation for `(data_type, date)` unless one already
    /// exists. Returns `true` if a row was inserted.
    pub fn insert_crawled_if_absent(
        &self,
        data_type: &str,
        calendar_day: &str,
        value: f64,
        raw: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "INSERT INTO crawled_data (data_type, date, value, raw, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(data_type, date) DO NOTHING",
            params![data_type, calendar_day, value, raw, now_ms()],
        )?;
        Ok(changed > 0)
    }

    /// Most recent observation for `data_type`, if any.
    pub fn latest_crawled(&self, data_type: &str) -> Result<Option<CrawledDatum>> {
        let conn = self.conn();
        let datum = conn
            .query_row(
                "SELECT data_type, date, value, raw, created_at FROM crawled_data \
                 WHERE data_type = ?1 ORDER BY date DESC LIMIT 1",
                params![data_type],
                |row| {
                    Ok(CrawledDatum {
                        data_type: row.get(0)?,
                        date: row.get(1)?,
                        value: row.get(2)?,
                        raw: row.get(3)?,
                        created_at_ms: row.get(4)?,
                    })
                },
            )
            .ok();
        Ok(datum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_absent_insert_is_dropped() {
        let store = Store::open_in_memory().unwrap();
        let first = store
            .insert_crawled_if_absent("btc_etf_flow", "2026-07-01", 125.5, None)
            .unwrap();
        let second = store
            .insert_crawled_if_absent("btc_etf_flow", "2026-07-01", 999.0, None)
            .unwrap();
        assert!(first);
        assert!(!second);

        let latest = store.latest_crawled("btc_etf_flow").unwrap().unwrap();
        assert_eq!(latest.value, 125.5);
    }

    #[test]
    fn distinct_dates_both_persist() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_crawled_if_absent("ibit_holdings_btc", "2026-07-01", 100.0, None)
            .unwrap();
        store
            .insert_crawled_if_absent("ibit_holdings_btc", "2026-07-02", 110.0, None)
            .unwrap();

        let latest = store.latest_crawled("ibit_holdings_btc").unwrap().unwrap();
        assert_eq!(latest.date, "2026-07-02");
        assert_eq!(latest.value, 110.0);
    }

    #[test]
    fn latest_crawled_missing_type_is_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.latest_crawled("nonexistent").unwrap().is_none());
    }
}
