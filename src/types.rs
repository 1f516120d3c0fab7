// =============================================================================
// Shared types used across the market-data core
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A candlestick timeframe. Ordered from smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Interval {
    /// All intervals the core understands, smallest first.
    pub const ALL: [Interval; 6] = [
        Interval::M1,
        Interval::M5,
        Interval::M15,
        Interval::H1,
        Interval::H4,
        Interval::D1,
    ];

    /// Interval length in milliseconds.
    pub fn millis(self) -> i64 {
        match self {
            Interval::M1 => 60_000,
            Interval::M5 => 300_000,
            Interval::M15 => 900_000,
            Interval::H1 => 3_600_000,
            Interval::H4 => 14_400_000,
            Interval::D1 => 86_400_000,
        }
    }

    /// Default number of bars to backfill on first sync for this interval.
    pub fn initial_lookback_bars(self) -> i64 {
        match self {
            Interval::M1 => 1440,
            Interval::M5 => 2016,
            Interval::M15 => 2016,
            Interval::H1 => 2000,
            Interval::H4 => 2000,
            Interval::D1 => 1095,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a timeframe token does not match the allowed set.
#[derive(Debug, Clone)]
pub struct UnknownIntervalError(pub String);

impl fmt::Display for UnknownIntervalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown timeframe token: {}", self.0)
    }
}

impl std::error::Error for UnknownIntervalError {}

impl FromStr for Interval {
    type Err = UnknownIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Interval::M1),
            "5m" => Ok(Interval::M5),
            "15m" => Ok(Interval::M15),
            "1h" => Ok(Interval::H1),
            "4h" => Ok(Interval::H4),
            "1d" => Ok(Interval::D1),
            other => Err(UnknownIntervalError(other.to_string())),
        }
    }
}

/// The action an agent signal (or a TA strategy output) recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "BUY"),
            TradeAction::Sell => write!(f, "SELL"),
            TradeAction::Hold => write!(f, "HOLD"),
        }
    }
}

impl FromStr for TradeAction {
    type Err = UnknownIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(TradeAction::Buy),
            "SELL" => Ok(TradeAction::Sell),
            "HOLD" => Ok(TradeAction::Hold),
            other => Err(UnknownIntervalError(other.to_string())),
        }
    }
}

/// Signal-quality grade: extremity + multi-timeframe concurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::A => write!(f, "A"),
            Grade::B => write!(f, "B"),
            Grade::C => write!(f, "C"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_round_trips_through_str() {
        for iv in Interval::ALL {
            let parsed: Interval = iv.as_str().parse().unwrap();
            assert_eq!(parsed, iv);
        }
    }

    #[test]
    fn interval_rejects_unknown_token() {
        assert!("3m".parse::<Interval>().is_err());
    }

    #[test]
    fn trade_action_parses_case_insensitively() {
        assert_eq!("buy".parse::<TradeAction>().unwrap(), TradeAction::Buy);
        assert_eq!("SELL".parse::<TradeAction>().unwrap(), TradeAction::Sell);
        assert!("MAYBE".parse::<TradeAction>().is_err());
    }

    #[test]
    fn interval_millis_matches_close_time_invariant() {
        // close_time_ms = open_time_ms + interval_ms - 1
        for iv in Interval::ALL {
            assert!(iv.millis() > 0);
        }
    }
}
