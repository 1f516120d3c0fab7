// =============================================================================
// Stablecoin Client — aggregate stablecoin market-cap supply
// =============================================================================
//
// Single-endpoint collector against a public stablecoin aggregator. Result
// is cached for an hour in-memory — total stablecoin supply moves on the
// order of days, not minutes, so this is the same slow-macro cache shape as
// `MacroClient`.
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::instrument;

use crate::collectors::{get_json_with_retry, http_client};
use crate::errors::CollectorError;

const SOURCE: &str = "stablecoin_aggregator";
const BASE_URL: &str = "https://stablecoins.llama.fi/stablecoins?includePrices=false";
const CACHE_TTL: Duration = Duration::from_secs(3600);

pub struct StablecoinClient {
    client: reqwest::Client,
    cache: Mutex<Option<(f64, Instant)>>,
}

impl StablecoinClient {
    pub fn new() -> Self {
        Self {
            client: http_client(),
            cache: Mutex::new(None),
        }
    }

    /// Total circulating stablecoin supply, in billions of USD.
    #[instrument(skip(self), name = "stablecoin::total_supply_b")]
    pub async fn total_supply_b(&self) -> Option<f64> {
        if let Some((value, fetched_at)) = *self.cache.lock() {
            if fetched_at.elapsed() < CACHE_TTL {
                return Some(value);
            }
        }

        let value = self.fetch_uncached().await.ok()?;
        *self.cache.lock() = Some((value, Instant::now()));
        Some(value)
    }

    async fn fetch_uncached(&self) -> Result<f64, CollectorError> {
        let body = get_json_with_retry(&self.client, BASE_URL, SOURCE).await?;
        let entries = body["peggedAssets"].as_array().ok_or_else(|| CollectorError::Malformed {
            source: SOURCE.to_string(),
            detail: "missing 'peggedAssets' array".to_string(),
        })?;

        let total_usd: f64 = entries
            .iter()
            .filter_map(|e| e["circulating"]["peggedUSD"].as_f64())
            .sum();

        Ok(total_usd / 1_000_000_000.0)
    }
}

impl Default for StablecoinClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_pegged_usd_across_entries() {
        let body = serde_json::json!({
            "peggedAssets": [
                {"circulating": {"peggedUSD": 60_000_000_000.0}},
                {"circulating": {"peggedUSD": 40_000_000_000.0}},
            ]
        });
        let entries = body["peggedAssets"].as_array().unwrap();
        let total: f64 = entries.iter().filter_map(|e| e["circulating"]["peggedUSD"].as_f64()).sum();
        assert!((total - 100_000_000_000.0).abs() < 1.0);
    }
}
