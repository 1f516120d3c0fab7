// =============================================================================
// On-Chain Clients — address balances, hashrate, halving countdown
// =============================================================================
//
// Generic, idempotent, side-effect-free lookups against public block
// explorer APIs. No API key is required for either network; both go through
// the shared retry/backoff machinery in `collectors::get_json_with_retry`.
// =============================================================================

use tracing::instrument;

use crate::collectors::{get_json_with_retry, http_client};
use crate::errors::CollectorError;

const BTC_SOURCE: &str = "blockchain_info";
const ETH_SOURCE: &str = "blockscout";
const BTC_EXPLORER_BASE: &str = "https://blockchain.info";
const ETH_EXPLORER_BASE: &str = "https://eth.blockscout.com/api";

/// Bitcoin halving occurs every 210,000 blocks; block time is modeled at the
/// network's long-run average of 10 minutes for the countdown estimate.
const HALVING_INTERVAL_BLOCKS: i64 = 210_000;
const AVG_BLOCK_MINUTES: f64 = 10.0;

pub struct OnChainClients {
    client: reqwest::Client,
}

impl OnChainClients {
    pub fn new() -> Self {
        Self { client: http_client() }
    }

    /// Confirmed balance (in the asset's native unit) held at `address` on
    /// `chain`. Returns `None` rather than propagating on any I/O or parse
    /// failure — on-chain enrichment is best-effort.
    #[instrument(skip(self), name = "onchain::address_balance")]
    pub async fn address_balance(&self, chain: Chain, address: &str) -> Option<f64> {
        match chain {
            Chain::Btc => self.btc_address_balance(address).await.ok(),
            Chain::Eth => self.eth_address_balance(address).await.ok(),
        }
    }

    async fn btc_address_balance(&self, address: &str) -> Result<f64, CollectorError> {
        let url = format!("{BTC_EXPLORER_BASE}/balance?active={address}");
        let body = get_json_with_retry(&self.client, &url, BTC_SOURCE).await?;
        let satoshis = body[address]["final_balance"].as_i64().ok_or_else(|| {
            CollectorError::Malformed {
                source: BTC_SOURCE.to_string(),
                detail: "missing final_balance".to_string(),
            }
        })?;
        Ok(satoshis as f64 / 100_000_000.0)
    }

    async fn eth_address_balance(&self, address: &str) -> Result<f64, CollectorError> {
        let url = format!("{ETH_EXPLORER_BASE}/v2/addresses/{address}");
        let body = get_json_with_retry(&self.client, &url, ETH_SOURCE).await?;
        let wei: f64 = body["coin_balance"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CollectorError::Malformed {
                source: ETH_SOURCE.to_string(),
                detail: "missing coin_balance".to_string(),
            })?;
        Ok(wei / 1e18)
    }

    /// Current estimated network hashrate, in TH/s.
    #[instrument(skip(self), name = "onchain::hashrate")]
    pub async fn hashrate(&self) -> Option<f64> {
        let url = format!("{BTC_EXPLORER_BASE}/q/hashrate");
        let text = self.client.get(&url).send().await.ok()?.text().await.ok()?;
        text.trim().parse::<f64>().ok().map(|gh| gh / 1000.0) // blockchain.info reports GH/s
    }

    /// Current block height and days remaining until the next halving.
    #[instrument(skip(self), name = "onchain::halving_countdown")]
    pub async fn halving_countdown(&self) -> Option<HalvingCountdown> {
        let url = format!("{BTC_EXPLORER_BASE}/q/getblockcount");
        let text = self.client.get(&url).send().await.ok()?.text().await.ok()?;
        let height: i64 = text.trim().parse().ok()?;

        let next_halving_height = ((height / HALVING_INTERVAL_BLOCKS) + 1) * HALVING_INTERVAL_BLOCKS;
        let blocks_remaining = next_halving_height - height;
        let days_remaining = (blocks_remaining as f64 * AVG_BLOCK_MINUTES) / (60.0 * 24.0);

        Some(HalvingCountdown {
            block_height: height,
            blocks_remaining,
            days_remaining,
        })
    }
}

impl Default for OnChainClients {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Chain {
    Btc,
    Eth,
}

#[derive(Debug, Clone, Copy)]
pub struct HalvingCountdown {
    pub block_height: i64,
    pub blocks_remaining: i64,
    pub days_remaining: f64,
}
