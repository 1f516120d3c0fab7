// =============================================================================
// Macro Client — FRED (Federal Reserve Economic Data) series
// =============================================================================
//
// Fetches federal funds rate, 10y treasury yield, M2 money supply and the
// dollar index from the FRED `series/observations` endpoint, keyed by an
// API key supplied via environment variable. Daily series use `frequency=d`;
// M2 (monthly) uses `frequency=m`, matching FRED's own observation cadence
// for that series.
//
// Each series gets its own 24-hour in-memory cache entry — macro data moves
// slowly enough that refetching it every scheduler tick would be wasteful
// and would burn through the caller's FRED API quota for no benefit.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{instrument, warn};

use crate::collectors::{get_json_with_retry, http_client};
use crate::errors::CollectorError;

const SOURCE: &str = "fred";
const BASE_URL: &str = "https://api.stlouisfed.org/fred/series/observations";
const CACHE_TTL: Duration = Duration::from_secs(24 * 3600);

/// Well-known FRED series IDs the macro bundle consumes.
pub mod series {
    pub const FED_FUNDS_RATE: &str = "DFF";
    pub const TREASURY_10Y: &str = "DGS10";
    pub const M2_SUPPLY: &str = "M2SL";
    pub const DOLLAR_INDEX: &str = "DTWEXBGS";
}

#[derive(Clone, Copy)]
struct CacheEntry {
    value: Option<f64>,
    fetched_at: Instant,
}

pub struct MacroClient {
    client: reqwest::Client,
    api_key: String,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl MacroClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn frequency_for(series_id: &str) -> &'static str {
        if series_id == series::M2_SUPPLY {
            "m"
        } else {
            "d"
        }
    }

    /// Latest observation for `series_id`, or `None` if the key is unset, the
    /// series is empty, or the request failed (collectors never propagate
    /// errors for optional macro enrichment — callers see a missing field).
    #[instrument(skip(self), name = "macro::fetch_series_latest")]
    pub async fn fetch_series_latest(&self, series_id: &str) -> Option<f64> {
        if self.api_key.is_empty() {
            return None;
        }

        if let Some(entry) = self.cache.lock().get(series_id).copied() {
            if entry.fetched_at.elapsed() < CACHE_TTL {
                return entry.value;
            }
        }

        let value = self.fetch_series_latest_uncached(series_id).await.ok();
        self.cache.lock().insert(
            series_id.to_string(),
            CacheEntry {
                value,
                fetched_at: Instant::now(),
            },
        );
        value
    }

    async fn fetch_series_latest_uncached(&self, series_id: &str) -> Result<f64, CollectorError> {
        let url = format!(
            "{BASE_URL}?series_id={series_id}&api_key={}&file_type=json&limit=1&sort_order=desc&frequency={}",
            self.api_key,
            Self::frequency_for(series_id),
        );
        let body = get_json_with_retry(&self.client, &url, SOURCE).await?;
        parse_latest_value(&body).ok_or_else(|| CollectorError::NoData {
            source: SOURCE.to_string(),
        })
    }

    /// Historical observations for `series_id` between `start`/`end`
    /// (YYYY-MM-DD). Frequency is selected per-series the same way as
    /// `fetch_series_latest`.
    #[instrument(skip(self), name = "macro::fetch_series_history")]
    pub async fn fetch_series_history(
        &self,
        series_id: &str,
        start: &str,
        end: &str,
    ) -> Result<Vec<(String, f64)>, CollectorError> {
        if self.api_key.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{BASE_URL}?series_id={series_id}&api_key={}&file_type=json&observation_start={start}&observation_end={end}&frequency={}&sort_order=asc",
            self.api_key,
            Self::frequency_for(series_id),
        );
        let body = get_json_with_retry(&self.client, &url, SOURCE).await?;

        let observations = body["observations"].as_array().ok_or_else(|| CollectorError::Malformed {
            source: SOURCE.to_string(),
            detail: "missing 'observations' array".to_string(),
        })?;

        let mut out = Vec::with_capacity(observations.len());
        for obs in observations {
            let date = match obs["date"].as_str() {
                Some(d) => d.to_string(),
                None => continue,
            };
            let value = match obs["value"].as_str() {
                Some(v) if v != "." => match v.parse::<f64>() {
                    Ok(parsed) => parsed,
                    Err(_) => {
                        warn!(series_id, date, "unparseable FRED observation value, skipping");
                        continue;
                    }
                },
                _ => continue,
            };
            out.push((date, value));
        }
        Ok(out)
    }

    /// Year-over-year M2 growth percentage, computed from the latest M2
    /// observation and the observation closest to 365 days prior.
    #[instrument(skip(self), name = "macro::m2_growth_yoy")]
    pub async fn m2_growth_yoy(&self) -> Option<f64> {
        let current = self.fetch_series_latest(series::M2_SUPPLY).await?;

        let one_year_ago = chrono::Utc::now() - chrono::Duration::days(365);
        let cutoff = one_year_ago.format("%Y-%m-%d").to_string();
        let url = format!(
            "{BASE_URL}?series_id={}&api_key={}&file_type=json&limit=1&sort_order=desc&observation_end={cutoff}&frequency=m",
            series::M2_SUPPLY,
            self.api_key,
        );
        let body = get_json_with_retry(&self.client, &url, SOURCE).await.ok()?;
        let prev = parse_latest_value(&body)?;

        if prev <= 0.0 {
            return None;
        }
        Some(((current - prev) / prev) * 100.0)
    }
}

fn parse_latest_value(body: &serde_json::Value) -> Option<f64> {
    let observations = body["observations"].as_array()?;
    let first = observations.first()?;
    let raw = first["value"].as_str()?;
    if raw == "." {
        return None;
    }
    raw.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_for_m2_is_monthly() {
        assert_eq!(MacroClient::frequency_for(series::M2_SUPPLY), "m");
        assert_eq!(MacroClient::frequency_for(series::FED_FUNDS_RATE), "d");
    }

    #[test]
    fn parse_latest_value_skips_missing_marker() {
        let body = serde_json::json!({"observations": [{"date": "2024-01-01", "value": "."}]});
        assert!(parse_latest_value(&body).is_none());
    }

    #[test]
    fn parse_latest_value_parses_numeric_string() {
        let body = serde_json::json!({"observations": [{"date": "2024-01-01", "value": "5.33"}]});
        assert_eq!(parse_latest_value(&body), Some(5.33));
    }

    #[tokio::test]
    async fn empty_api_key_short_circuits_without_network() {
        let client = MacroClient::new("");
        assert!(client.fetch_series_latest(series::FED_FUNDS_RATE).await.is_none());
        assert!(client.fetch_series_history(series::FED_FUNDS_RATE, "2024-01-01", "2024-02-01").await.unwrap().is_empty());
    }
}
