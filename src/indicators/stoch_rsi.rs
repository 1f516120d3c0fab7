// =============================================================================
// Stochastic RSI
// =============================================================================
//
// Applies the Stochastic oscillator formula to an RSI series rather than to
// price, producing a more sensitive (and noisier) overbought/oversold read.
//
//   rsi_series = RSI(closes, rsi_period)
//   k = (rsi_now - min(rsi_window)) / (max(rsi_window) - min(rsi_window)) * 100
//   d = mean of the last three `k` values
// =============================================================================

use crate::indicators::rsi::calculate_rsi;

/// `{k, d}` pair for the most recent bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochRsi {
    pub k: f64,
    pub d: f64,
}

/// Compute the current StochRSI `{k, d}` from a close-price series.
///
/// Returns `None` when there isn't enough RSI history to fill a
/// `stoch_period`-wide window, or when the RSI window is flat (max == min,
/// division guard — `k` falls back to 50.0 in that case instead of failing).
pub fn calculate_stoch_rsi(
    closes: &[f64],
    rsi_period: usize,
    stoch_period: usize,
) -> Option<StochRsi> {
    if stoch_period == 0 {
        return None;
    }

    let rsi_series = calculate_rsi(closes, rsi_period);
    if rsi_series.len() < stoch_period {
        return None;
    }

    let mut k_values = Vec::with_capacity(rsi_series.len() - stoch_period + 1);
    for window in rsi_series.windows(stoch_period) {
        let min = window.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let current = *window.last().unwrap();

        let k = if (max - min).abs() < f64::EPSILON {
            50.0
        } else {
            (current - min) / (max - min) * 100.0
        };
        k_values.push(k);
    }

    let k = *k_values.last()?;
    let d_window = &k_values[k_values.len().saturating_sub(3)..];
    let d = d_window.iter().sum::<f64>() / d_window.len() as f64;

    Some(StochRsi { k, d })
}
