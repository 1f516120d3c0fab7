// =============================================================================
// Runtime Configuration — hot-reloadable service settings with atomic save
// =============================================================================
//
// Central configuration hub for the market-data core. Every tunable
// parameter lives here so the service can be reconfigured without a
// restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_exchange_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_exchange_kline_base_url() -> String {
    // Binance's public data mirror, used specifically for K-line history
    // pulls to avoid regional blocks on the primary endpoint.
    "https://data-api.binance.vision".to_string()
}

fn default_scheduler_timezone() -> String {
    "UTC".to_string()
}

fn default_rate_limit_max_rate() -> f64 {
    8.0
}

fn default_rate_limit_burst() -> u32 {
    12
}

fn default_kline_concurrency() -> usize {
    3
}

fn default_kline_batch_pause_ms() -> u64 {
    300
}

fn default_crawl_interval_minutes() -> i64 {
    60
}

fn default_buy_threshold() -> f64 {
    65.0
}

fn default_sell_threshold() -> f64 {
    35.0
}

fn default_atr_stop_mult() -> f64 {
    1.5
}

fn default_atr_target_mult() -> f64 {
    2.5
}

fn default_klines_limit() -> u32 {
    200
}

fn default_tf_weights() -> HashMap<String, f64> {
    let mut m = HashMap::new();
    m.insert("4h".to_string(), 0.50);
    m.insert("1h".to_string(), 0.35);
    m.insert("15m".to_string(), 0.15);
    m
}

fn default_component_weights() -> HashMap<String, f64> {
    let mut m = HashMap::new();
    m.insert("ema_alignment".to_string(), 0.20);
    m.insert("rsi".to_string(), 0.15);
    m.insert("stoch_rsi".to_string(), 0.10);
    m.insert("macd".to_string(), 0.20);
    m.insert("bollinger".to_string(), 0.10);
    m.insert("volume".to_string(), 0.10);
    m.insert("trend_structure".to_string(), 0.15);
    m
}

fn default_base_position_size() -> f64 {
    0.1
}

fn default_etf_lookup_spacing_ms() -> u64 {
    500
}

// =============================================================================
// TaParams
// =============================================================================

/// Tunable parameters for the TA strategy (thresholds, ATR multipliers,
/// component/timeframe weights, position sizing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaParams {
    #[serde(default = "default_buy_threshold")]
    pub buy_threshold: f64,
    #[serde(default = "default_sell_threshold")]
    pub sell_threshold: f64,
    #[serde(default = "default_atr_stop_mult")]
    pub atr_stop_mult: f64,
    #[serde(default = "default_atr_target_mult")]
    pub atr_target_mult: f64,
    #[serde(default = "default_klines_limit")]
    pub klines_limit: u32,
    #[serde(default = "default_tf_weights")]
    pub timeframe_weights: HashMap<String, f64>,
    #[serde(default = "default_component_weights")]
    pub component_weights: HashMap<String, f64>,
    #[serde(default = "default_base_position_size")]
    pub base_position_size: f64,
}

impl Default for TaParams {
    fn default() -> Self {
        Self {
            buy_threshold: default_buy_threshold(),
            sell_threshold: default_sell_threshold(),
            atr_stop_mult: default_atr_stop_mult(),
            atr_target_mult: default_atr_target_mult(),
            klines_limit: default_klines_limit(),
            timeframe_weights: default_tf_weights(),
            component_weights: default_component_weights(),
            base_position_size: default_base_position_size(),
        }
    }
}

// =============================================================================
// RateLimitParams
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitParams {
    #[serde(default = "default_rate_limit_max_rate")]
    pub max_rate: f64,
    #[serde(default = "default_rate_limit_burst")]
    pub burst: u32,
    #[serde(default = "default_kline_concurrency")]
    pub kline_concurrency: usize,
    #[serde(default = "default_kline_batch_pause_ms")]
    pub kline_batch_pause_ms: u64,
    #[serde(default = "default_etf_lookup_spacing_ms")]
    pub etf_lookup_spacing_ms: u64,
}

impl Default for RateLimitParams {
    fn default() -> Self {
        Self {
            max_rate: default_rate_limit_max_rate(),
            burst: default_rate_limit_burst(),
            kline_concurrency: default_kline_concurrency(),
            kline_batch_pause_ms: default_kline_batch_pause_ms(),
            etf_lookup_spacing_ms: default_etf_lookup_spacing_ms(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the market-data core.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Symbols the core collects and serves data for.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Directory for the embedded SQL store and any on-disk caches.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Base URL for ticker / spot-price endpoints.
    #[serde(default = "default_exchange_base_url")]
    pub exchange_base_url: String,

    /// Base URL for K-line history pulls (data-mirror endpoint).
    #[serde(default = "default_exchange_kline_base_url")]
    pub exchange_kline_base_url: String,

    /// IANA timezone name the scheduler's triggers are evaluated in.
    #[serde(default = "default_scheduler_timezone")]
    pub scheduler_timezone: String,

    /// Minutes between crawler eligibility checks for a given spider source.
    #[serde(default = "default_crawl_interval_minutes")]
    pub crawl_interval_minutes: i64,

    #[serde(default)]
    pub rate_limit: RateLimitParams,

    #[serde(default)]
    pub ta_params: TaParams,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            data_dir: default_data_dir(),
            exchange_base_url: default_exchange_base_url(),
            exchange_kline_base_url: default_exchange_kline_base_url(),
            scheduler_timezone: default_scheduler_timezone(),
            crawl_interval_minutes: default_crawl_interval_minutes(),
            rate_limit: RateLimitParams::default(),
            ta_params: TaParams::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(path = %path.display(), symbols = ?config.symbols, "runtime config loaded");

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.symbols.len(), 5);
        assert_eq!(cfg.symbols[0], "BTCUSDT");
        assert!((cfg.rate_limit.max_rate - 8.0).abs() < f64::EPSILON);
        assert_eq!(cfg.rate_limit.burst, 12);
        assert_eq!(cfg.rate_limit.kline_concurrency, 3);
        assert!((cfg.ta_params.buy_threshold - 65.0).abs() < f64::EPSILON);
        assert!((cfg.ta_params.sell_threshold - 35.0).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbols.len(), 5);
        assert_eq!(cfg.crawl_interval_minutes, 60);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbols": ["ETHUSDT"] }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["ETHUSDT"]);
        assert_eq!(cfg.rate_limit.burst, 12);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.data_dir, cfg2.data_dir);
    }

    #[test]
    fn load_and_save_round_trip(
    ) {
        let dir = std::env::temp_dir().join(format!("rc_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");

        let cfg = RuntimeConfig::default();
        cfg.save(&path).unwrap();
        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(cfg.symbols, loaded.symbols);

        std::fs::remove_dir_all(&dir).ok();
    }
}
