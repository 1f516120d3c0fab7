// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Bollinger Bands consist of a middle band (SMA), an upper band (SMA + k*σ),
// and a lower band (SMA - k*σ). The Band Width (BBW) is the normalised
// distance: BBW = (upper - lower) / middle * 100.
//
// BBW is the primary metric used by the regime detector.

/// Bandwidth (normalised `width`, not the percentage form) below this
/// threshold is flagged as a volatility squeeze.
const SQUEEZE_THRESHOLD: f64 = 0.03;

/// Result of a Bollinger Band calculation.
#[derive(Debug, Clone)]
pub struct BollingerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Bollinger Band Width, `(upper - lower) / middle * 100`.
    pub width: f64,
    /// Where the last close sits between the bands: 0.0 at the lower band,
    /// 1.0 at the upper band (can exceed \[0,1\] when price pierces a band).
    pub percent_b: f64,
    /// `true` when bandwidth (`width / 100`) has contracted below
    /// [`SQUEEZE_THRESHOLD`] — a volatility-compression signal.
    pub squeeze: bool,
}

/// Calculate Bollinger Bands for the given closing prices.
///
/// Returns `Some(BollingerResult)` containing:
/// - `upper`  = SMA + `num_std` * σ
/// - `middle` = SMA
/// - `lower`  = SMA - `num_std` * σ
/// - `width`  = (upper - lower) / middle * 100  (Bollinger Band Width)
/// - `percent_b` = (last_close - lower) / (upper - lower)
/// - `squeeze` = bandwidth < 3%
///
/// Returns `None` when:
/// - Fewer than `period` data points.
/// - Middle band is zero (degenerate input).
pub fn calculate_bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerResult> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let sum: f64 = window.iter().sum();
    let middle = sum / period as f64;

    if middle == 0.0 {
        return None;
    }

    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let upper = middle + num_std * std_dev;
    let lower = middle - num_std * std_dev;
    let width = (upper - lower) / middle * 100.0;

    if !width.is_finite() {
        return None;
    }

    let band_range = upper - lower;
    let last_close = *window.last().expect("period > 0 guaranteed non-empty window");
    let percent_b = if band_range == 0.0 {
        0.5
    } else {
        (last_close - lower) / band_range
    };

    let squeeze = (width / 100.0) < SQUEEZE_THRESHOLD;

    Some(BollingerResult {
        upper,
        middle,
        lower,
        width,
        percent_b,
        squeeze,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_basic() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let result = calculate_bollinger(&closes, 20, 2.0);
        assert!(result.is_some());
        let bb = result.unwrap();
        assert!(bb.upper > bb.middle);
        assert!(bb.lower < bb.middle);
        assert!(bb.width > 0.0);
    }

    #[test]
    fn bollinger_insufficient_data() {
        let closes = vec![1.0, 2.0, 3.0];
        assert!(calculate_bollinger(&closes, 20, 2.0).is_none());
    }

    #[test]
    fn bollinger_flat() {
        let closes = vec![100.0; 20];
        let result = calculate_bollinger(&closes, 20, 2.0);
        assert!(result.is_some());
        let bb = result.unwrap();
        assert!((bb.width - 0.0).abs() < 1e-10);
        assert!(bb.squeeze, "zero-width band must flag as a squeeze");
    }

    #[test]
    fn percent_b_is_one_at_upper_band_touch() {
        // Ascending series: last close is the window maximum, well above the
        // mean, pushing percent_b toward (and potentially past) 1.0.
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.percent_b > 0.5);
    }

    #[test]
    fn squeeze_flags_low_volatility_window() {
        // Tight band around 100 — bandwidth well under 3%.
        let mut closes = vec![100.0; 19];
        closes.push(100.05);
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.squeeze);
    }

    #[test]
    fn squeeze_does_not_flag_wide_band() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64 * 10.0).collect();
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!(!bb.squeeze);
    }
}
