// =============================================================================
// Collector Clients — per-source adapters over shared HTTP machinery
// =============================================================================
//
// Every collector in this module returns normalized records and never writes
// to the store directly — results flow back to the caller (Market Data
// Service, Scheduler, K-line Sync Engine), which persists them through
// `crate::store`. Failures never cross the collector boundary as panics;
// they come back as a typed `CollectorError`.
//
// All collectors share one `reqwest::Client` connection pool (30s total /
// 10s connect timeout, one user-agent string), built once in `http_client()`
// and cloned cheaply into each adapter.
// =============================================================================

pub mod etf_onchain;
pub mod macro_client;
pub mod onchain;
pub mod sentiment;
pub mod spiders;
pub mod stablecoin;

use std::time::Duration;

use reqwest::StatusCode;
use tracing::warn;

use crate::errors::CollectorError;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);

/// Build the shared HTTP client used by every collector. Mirrors
/// `ExchangeClient::new`'s pool settings so every outbound call in the core
/// obeys the same timeout/user-agent policy.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .user_agent("marketdata-core/0.1")
        .build()
        .expect("failed to build reqwest client")
}

/// Shared GET-with-retry machinery: 429 honors `Retry-After` else doubles
/// from `INITIAL_BACKOFF`, up to `MAX_RETRIES`; 418 is a fatal hard block;
/// timeouts retry with the same doubling backoff. Used by every collector
/// that doesn't need a bespoke wire format (`ExchangeClient` keeps its own
/// copy since klines/tickers predate this shared helper, but is otherwise
/// identical policy).
pub async fn get_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    source: &str,
) -> Result<serde_json::Value, CollectorError> {
    let mut attempt = 0u32;
    let mut backoff = INITIAL_BACKOFF;

    loop {
        attempt += 1;
        let sent = client.get(url).send().await;

        let resp = match sent {
            Ok(r) => r,
            Err(e) if e.is_timeout() && attempt <= MAX_RETRIES => {
                warn!(source, attempt, "request timed out, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                continue;
            }
            Err(e) => {
                return Err(CollectorError::Transient {
                    source: source.to_string(),
                    detail: e.to_string(),
                })
            }
        };

        match resp.status() {
            StatusCode::IM_A_TEAPOT => {
                return Err(CollectorError::HardBlocked {
                    source: source.to_string(),
                });
            }
            StatusCode::TOO_MANY_REQUESTS => {
                if attempt > MAX_RETRIES {
                    return Err(CollectorError::RateLimited {
                        source: source.to_string(),
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
                warn!(source, attempt, wait_secs = wait.as_secs(), "rate limited (429), backing off");
                tokio::time::sleep(wait).await;
                backoff *= 2;
                continue;
            }
            status if status.is_success() => {
                return resp.json().await.map_err(|e| CollectorError::Malformed {
                    source: source.to_string(),
                    detail: e.to_string(),
                });
            }
            status => {
                return Err(CollectorError::Transient {
                    source: source.to_string(),
                    detail: format!("unexpected status {status}"),
                });
            }
        }
    }
}
