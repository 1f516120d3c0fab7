// =============================================================================
// ATR-based Stop-Loss / Take-Profit
// =============================================================================
//
//   long:  stop_loss   = entry - atr * stop_mult
//          take_profit = entry + atr * target_mult
//   short: mirrored around entry
//
// risk_reward = (take_profit - entry).abs() / (entry - stop_loss).abs()
// =============================================================================

use crate::types::TradeAction;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopTarget {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward: f64,
}

/// Derive stop-loss/take-profit levels from an ATR reading and the intended
/// trade direction. Returns `None` for `TradeAction::Hold` (no position, no
/// levels to compute) or when `atr` is non-positive or non-finite.
pub fn calculate_stop_target(
    entry_price: f64,
    atr: f64,
    action: TradeAction,
    stop_mult: f64,
    target_mult: f64,
) -> Option<StopTarget> {
    if !atr.is_finite() || atr <= 0.0 || !entry_price.is_finite() {
        return None;
    }

    let (stop_loss, take_profit) = match action {
        TradeAction::Buy => (
            entry_price - atr * stop_mult,
            entry_price + atr * target_mult,
        ),
        TradeAction::Sell => (
            entry_price + atr * stop_mult,
            entry_price - atr * target_mult,
        ),
        TradeAction::Hold => return None,
    };

    let risk = (entry_price - stop_loss).abs();
    if risk == 0.0 {
        return None;
    }
    let reward = (take_profit - entry_price).abs();
    let risk_reward = reward / risk;

    Some(StopTarget {
        stop_loss,
        take_profit,
        risk_reward,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_action_yields_no_levels() {
        assert!(calculate_stop_target(100.0, 2.0, TradeAction::Hold, 1.5, 2.5).is_none());
    }

    #[test]
    fn buy_places_stop_below_and_target_above_entry() {
        let st = calculate_stop_target(100.0, 2.0, TradeAction::Buy, 1.5, 2.5).unwrap();
        assert!(st.stop_loss < 100.0);
        assert!(st.take_profit > 100.0);
        assert!((st.risk_reward - (2.5 / 1.5)).abs() < 1e-9);
    }

    #[test]
    fn sell_places_stop_above_and_target_below_entry() {
        let st = calculate_stop_target(100.0, 2.0, TradeAction::Sell, 1.5, 2.5).unwrap();
        assert!(st.stop_loss > 100.0);
        assert!(st.take_profit < 100.0);
    }

    #[test]
    fn non_positive_atr_returns_none() {
        assert!(calculate_stop_target(100.0, 0.0, TradeAction::Buy, 1.5, 2.5).is_none());
        assert!(calculate_stop_target(100.0, -1.0, TradeAction::Buy, 1.5, 2.5).is_none());
    }

    #[test]
    fn nan_atr_returns_none() {
        assert!(calculate_stop_target(100.0, f64::NAN, TradeAction::Buy, 1.5, 2.5).is_none());
    }
}
