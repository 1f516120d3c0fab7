// =============================================================================
// Candlestick Pattern Tags
// =============================================================================
//
// Single- and two-bar reversal/indecision patterns, evaluated against the
// most recent bar(s) in the slice. Tags are additive — a bar may carry
// several at once (e.g. a small-bodied doji that is also an engulfing
// continuation of the prior range).
// =============================================================================

use crate::store::bars::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandleTag {
    Doji,
    Hammer,
    ShootingStar,
    BullishEngulfing,
    BearishEngulfing,
}

/// A bar's body is "small" relative to its range when it's under this
/// fraction of the high-low range.
const DOJI_BODY_RATIO: f64 = 0.1;
/// Hammer/shooting-star wick must be at least this multiple of the body.
const WICK_BODY_RATIO: f64 = 2.0;

fn range(bar: &Bar) -> f64 {
    bar.high - bar.low
}

fn body(bar: &Bar) -> f64 {
    (bar.close - bar.open).abs()
}

fn is_doji(bar: &Bar) -> bool {
    let r = range(bar);
    r > 0.0 && body(bar) / r < DOJI_BODY_RATIO
}

fn is_hammer(bar: &Bar) -> bool {
    let r = range(bar);
    if r <= 0.0 {
        return false;
    }
    let b = body(bar);
    if b == 0.0 {
        return false;
    }
    let lower_wick = bar.open.min(bar.close) - bar.low;
    let upper_wick = bar.high - bar.open.max(bar.close);
    lower_wick >= b * WICK_BODY_RATIO && upper_wick < b
}

fn is_shooting_star(bar: &Bar) -> bool {
    let r = range(bar);
    if r <= 0.0 {
        return false;
    }
    let b = body(bar);
    if b == 0.0 {
        return false;
    }
    let upper_wick = bar.high - bar.open.max(bar.close);
    let lower_wick = bar.open.min(bar.close) - bar.low;
    upper_wick >= b * WICK_BODY_RATIO && lower_wick < b
}

fn is_bullish_engulfing(prev: &Bar, curr: &Bar) -> bool {
    prev.close < prev.open
        && curr.close > curr.open
        && curr.open <= prev.close
        && curr.close >= prev.open
}

fn is_bearish_engulfing(prev: &Bar, curr: &Bar) -> bool {
    prev.close > prev.open
        && curr.close < curr.open
        && curr.open >= prev.close
        && curr.close <= prev.open
}

/// Tag the most recent bar in `bars` (ascending by `open_time_ms`) with any
/// matching candlestick patterns. Returns an empty set rather than `None`
/// when fewer than 2 bars are supplied or no pattern matches.
pub fn tag_candles(bars: &[Bar]) -> Vec<CandleTag> {
    let mut tags = Vec::new();

    let Some(curr) = bars.last() else {
        return tags;
    };

    if is_doji(curr) {
        tags.push(CandleTag::Doji);
    }
    if is_hammer(curr) {
        tags.push(CandleTag::Hammer);
    }
    if is_shooting_star(curr) {
        tags.push(CandleTag::ShootingStar);
    }

    if bars.len() >= 2 {
        let prev = &bars[bars.len() - 2];
        if is_bullish_engulfing(prev, curr) {
            tags.push(CandleTag::BullishEngulfing);
        }
        if is_bearish_engulfing(prev, curr) {
            tags.push(CandleTag::BearishEngulfing);
        }
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Interval;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            symbol: "BTCUSDT".into(),
            interval: Interval::H1,
            open_time_ms: 0,
            close_time_ms: 0,
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn empty_input_returns_no_tags() {
        assert!(tag_candles(&[]).is_empty());
    }

    #[test]
    fn doji_detected_on_tiny_body() {
        let bars = vec![bar(100.0, 110.0, 90.0, 100.5)];
        assert!(tag_candles(&bars).contains(&CandleTag::Doji));
    }

    #[test]
    fn hammer_detected_on_long_lower_wick() {
        let bars = vec![bar(100.0, 101.0, 80.0, 100.5)];
        assert!(tag_candles(&bars).contains(&CandleTag::Hammer));
    }

    #[test]
    fn shooting_star_detected_on_long_upper_wick() {
        let bars = vec![bar(100.0, 120.0, 99.0, 100.5)];
        assert!(tag_candles(&bars).contains(&CandleTag::ShootingStar));
    }

    #[test]
    fn bullish_engulfing_detected_across_two_bars() {
        let bars = vec![bar(100.0, 101.0, 95.0, 96.0), bar(95.5, 102.0, 95.0, 101.0)];
        assert!(tag_candles(&bars).contains(&CandleTag::BullishEngulfing));
    }

    #[test]
    fn bearish_engulfing_detected_across_two_bars() {
        let bars = vec![bar(95.0, 101.0, 94.0, 100.0), bar(100.5, 101.0, 93.0, 94.0)];
        assert!(tag_candles(&bars).contains(&CandleTag::BearishEngulfing));
    }

    #[test]
    fn single_bar_never_yields_engulfing_tags() {
        let bars = vec![bar(100.0, 105.0, 95.0, 102.0)];
        let tags = tag_candles(&bars);
        assert!(!tags.contains(&CandleTag::BullishEngulfing));
        assert!(!tags.contains(&CandleTag::BearishEngulfing));
    }
}
