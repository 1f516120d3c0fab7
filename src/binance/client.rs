// =============================================================================
// Exchange Client — public Binance market-data endpoints
// =============================================================================
//
// Only the public, unauthenticated surface is used: klines, 24h ticker, spot
// price. No API key/secret, no signing, no order endpoints — this core never
// places or manages orders.
//
// Retry policy: HTTP 429 reads `Retry-After` when present and backs off
// (initial 2s, doubling, up to 3 retries); HTTP 418 (IP ban) is treated as a
// fatal, non-retryable collector error; connection timeouts retry up to 3
// times with the same doubling backoff.
// =============================================================================

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

use crate::errors::CollectorError;
use crate::store::bars::Bar;
use crate::store::market_cache::MarketCacheEntry;
use crate::types::Interval;
use crate::util::now_ms;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const SOURCE: &str = "binance";

/// Public Binance REST client used by the K-line sync engine and the market
/// data service.
#[derive(Clone)]
pub struct ExchangeClient {
    /// Base URL for ticker/price endpoints (`api.binance.com`).
    base_url: String,
    /// Base URL used specifically for K-line history pulls (the public data
    /// mirror, to dodge regional blocks on the primary endpoint).
    kline_base_url: String,
    client: reqwest::Client,
}

impl ExchangeClient {
    pub fn new(base_url: impl Into<String>, kline_base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("marketdata-core/0.1")
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            kline_base_url: kline_base_url.into(),
            client,
        }
    }

    // -------------------------------------------------------------------------
    // Klines
    // -------------------------------------------------------------------------

    /// GET klines. `start_ms`/`end_ms` are optional; `limit` is capped at
    /// 1000 by the caller (the exchange itself enforces this too).
    #[instrument(skip(self), name = "exchange::fetch_klines")]
    pub async fn fetch_klines(
        &self,
        symbol: &str,
        interval: Interval,
        start_ms: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Bar>, CollectorError> {
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.kline_base_url,
            symbol,
            interval.as_str(),
            limit.min(1000),
        );
        if let Some(start) = start_ms {
            url.push_str(&format!("&startTime={start}"));
        }

        let body = self.get_with_retry(&url).await?;

        let raw = body.as_array().ok_or_else(|| CollectorError::Malformed {
            source: SOURCE.to_string(),
            detail: "klines response is not a JSON array".to_string(),
        })?;

        if raw.is_empty() {
            return Ok(Vec::new());
        }

        let mut bars = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = entry.as_array().ok_or_else(|| CollectorError::Malformed {
                source: SOURCE.to_string(),
                detail: "kline entry is not an array".to_string(),
            })?;
            if arr.len() < 7 {
                warn!(symbol, len = arr.len(), "skipping malformed kline entry");
                continue;
            }

            let open_time_ms = arr[0].as_i64().unwrap_or(0);
            let open = parse_str_f64(&arr[1])?;
            let high = parse_str_f64(&arr[2])?;
            let low = parse_str_f64(&arr[3])?;
            let close = parse_str_f64(&arr[4])?;
            let volume = parse_str_f64(&arr[5])?;
            let close_time_ms = arr[6].as_i64().unwrap_or(0);

            bars.push(Bar {
                symbol: symbol.to_string(),
                interval,
                open_time_ms,
                close_time_ms,
                open,
                high,
                low,
                close,
                volume,
            });
        }

        debug!(symbol, interval = %interval, count = bars.len(), "klines fetched");
        Ok(bars)
    }

    // -------------------------------------------------------------------------
    // Ticker / spot price
    // -------------------------------------------------------------------------

    #[instrument(skip(self), name = "exchange::fetch_ticker_24h")]
    pub async fn fetch_ticker_24h(&self, symbol: &str) -> Result<MarketCacheEntry, CollectorError> {
        let url = format!("{}/api/v3/ticker/24hr?symbol={}", self.base_url, symbol);
        let body = self.get_with_retry(&url).await?;

        let price = body["lastPrice"].as_str().and_then(|s| s.parse().ok());
        let price = price.ok_or_else(|| CollectorError::Malformed {
            source: SOURCE.to_string(),
            detail: "ticker response missing lastPrice".to_string(),
        })?;

        let change_pct_24h = body["priceChangePercent"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);
        let high_24h = body["highPrice"].as_str().and_then(|s| s.parse().ok());
        let low_24h = body["lowPrice"].as_str().and_then(|s| s.parse().ok());
        let volume_24h = body["volume"].as_str().and_then(|s| s.parse().ok());

        Ok(MarketCacheEntry {
            symbol: symbol.to_string(),
            price,
            change_pct_24h,
            high_24h,
            low_24h,
            volume_24h,
            updated_at_ms: now_ms(),
        })
    }

    #[instrument(skip(self), name = "exchange::fetch_spot_price")]
    pub async fn fetch_spot_price(&self, symbol: &str) -> Result<f64, CollectorError> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);
        let body = self.get_with_retry(&url).await?;

        body["price"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CollectorError::Malformed {
                source: SOURCE.to_string(),
                detail: "price response missing 'price' field".to_string(),
            })
    }

    // -------------------------------------------------------------------------
    // Retry machinery
    // -------------------------------------------------------------------------

    async fn get_with_retry(&self, url: &str) -> Result<serde_json::Value, CollectorError> {
        let mut attempt = 0u32;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            attempt += 1;
            let sent = self.client.get(url).send().await;

            let resp = match sent {
                Ok(r) => r,
                Err(e) if e.is_timeout() && attempt <= MAX_RETRIES => {
                    warn!(attempt, "exchange request timed out, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    continue;
                }
                Err(e) => {
                    return Err(CollectorError::Transient {
                        source: SOURCE.to_string(),
                        detail: e.to_string(),
                    })
                }
            };

            match resp.status() {
                StatusCode::IM_A_TEAPOT => {
                    // Binance's hard IP-ban signal. Never retry.
                    return Err(CollectorError::HardBlocked {
                        source: SOURCE.to_string(),
                    });
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    if attempt > MAX_RETRIES {
                        return Err(CollectorError::RateLimited {
                            source: SOURCE.to_string(),
                            attempts: attempt,
                        });
                    }
                    let wait = resp
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or(backoff);
                    warn!(attempt, wait_secs = wait.as_secs(), "rate limited (429), backing off");
                    tokio::time::sleep(wait).await;
                    backoff *= 2;
                    continue;
                }
                status if status.is_success() => {
                    return resp.json().await.map_err(|e| CollectorError::Malformed {
                        source: SOURCE.to_string(),
                        detail: e.to_string(),
                    });
                }
                status => {
                    return Err(CollectorError::Transient {
                        source: SOURCE.to_string(),
                        detail: format!("unexpected status {status}"),
                    });
                }
            }
        }
    }
}

fn parse_str_f64(val: &serde_json::Value) -> Result<f64, CollectorError> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>().map_err(|_| CollectorError::Malformed {
            source: SOURCE.to_string(),
            detail: format!("could not parse '{s}' as f64"),
        })
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        Err(CollectorError::Malformed {
            source: SOURCE.to_string(),
            detail: format!("expected string or number, got: {val}"),
        })
    }
}

impl std::fmt::Debug for ExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeClient")
            .field("base_url", &self.base_url)
            .field("kline_base_url", &self.kline_base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_str_f64_accepts_string_and_number() {
        assert_eq!(parse_str_f64(&serde_json::json!("1.5")).unwrap(), 1.5);
        assert_eq!(parse_str_f64(&serde_json::json!(2.5)).unwrap(), 2.5);
    }

    #[test]
    fn parse_str_f64_rejects_garbage() {
        assert!(parse_str_f64(&serde_json::json!("not-a-number")).is_err());
        assert!(parse_str_f64(&serde_json::json!(null)).is_err());
    }

    #[test]
    fn client_construction_does_not_panic() {
        let _client = ExchangeClient::new("https://api.binance.com", "https://data-api.binance.vision");
    }
}
