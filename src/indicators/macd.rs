// =============================================================================
// MACD — Moving Average Convergence Divergence
// =============================================================================
//
//   macd_line   = EMA(fast) - EMA(slow)
//   signal_line = EMA(macd_line series, signal_period)
//   histogram   = macd_line - signal_line
//
// Cross detection compares the last two `(macd - signal)` deltas: a sign
// flip negative -> positive is a golden cross, positive -> negative is a
// death cross.
// =============================================================================

use crate::indicators::ema::calculate_ema;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Cross {
    Golden,
    Death,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
    pub trend: Trend,
    pub cross: Cross,
}

/// Compute the current MACD reading for a close-price series.
///
/// `calculate_ema` never returns an empty series for non-empty input, so
/// this only returns `None` when `closes` itself is empty or too short to
/// form at least two `(macd, signal)` pairs for cross detection.
pub fn calculate_macd(
    closes: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Option<Macd> {
    if closes.len() < 2 {
        return None;
    }

    let fast = calculate_ema(closes, fast_period);
    let slow = calculate_ema(closes, slow_period);

    let macd_series: Vec<f64> = fast.iter().zip(slow.iter()).map(|(f, s)| f - s).collect();
    if macd_series.len() < 2 {
        return None;
    }

    let signal_series = calculate_ema(&macd_series, signal_period);

    let macd_line = *macd_series.last()?;
    let signal_line = *signal_series.last()?;
    let histogram = macd_line - signal_line;

    let trend = if macd_line > 0.0 {
        Trend::Bullish
    } else {
        Trend::Bearish
    };

    let n = macd_series.len();
    let prev_delta = macd_series[n - 2] - signal_series[n - 2];
    let last_delta = macd_line - signal_line;

    let cross = if prev_delta < 0.0 && last_delta > 0.0 {
        Cross::Golden
    } else if prev_delta > 0.0 && last_delta < 0.0 {
        Cross::Death
    } else {
        Cross::None
    };

    Some(Macd {
        macd_line,
        signal_line,
        histogram,
        trend,
        cross,
    })
}
