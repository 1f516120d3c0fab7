// =============================================================================
// AgentSignal DAO — agent_signals table
// =============================================================================

use anyhow::Result;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::store::Store;
use crate::types::TradeAction;
use crate::util::now_ms;

/// Write-only audit record from an external agent. Validated at the API
/// boundary before it reaches the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSignal {
    pub id: Option<i64>,
    pub agent_id: Option<String>,
    pub strategy_name: Option<String>,
    pub symbol: String,
    pub action: TradeAction,
    pub conviction: f64,
    pub price_at_signal: Option<f64>,
    pub reason: Option<String>,
    pub raw_analysis: Option<String>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub created_at_ms: i64,
}

impl AgentSignal {
    /// Validate `symbol` is non-empty; `action` is validated by construction
    /// since [`TradeAction`] only has the three allowed variants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.symbol.trim().is_empty() {
            return Err(ValidationError::Empty { field: "symbol" });
        }
        Ok(())
    }
}

impl Store {
    /// Validate and persist `signal`, returning the assigned row id.
    pub fn insert_agent_signal(&self, signal: &AgentSignal) -> Result<i64> {
        signal.validate()?;

        let conn = self.conn();
        conn.execute(
            "INSERT INTO agent_signals \
             (agent_id, strategy_name, symbol, action, conviction, price_at_signal, \
              reason, raw_analysis, stop_loss, take_profit, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                signal.agent_id,
                signal.strategy_name,
                signal.symbol,
                signal.action.to_string(),
                signal.conviction,
                signal.price_at_signal,
                signal.reason,
                signal.raw_analysis,
                signal.stop_loss,
                signal.take_profit,
                now_ms(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Reverse-chronological read, optionally filtered to one symbol.
    pub fn list_agent_signals(&self, symbol: Option<&str>, limit: u32) -> Result<Vec<AgentSignal>> {
        let conn = self.conn();

        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<AgentSignal> {
            let action_str: String = row.get(4)?;
            Ok(AgentSignal {
                id: row.get(0)?,
                agent_id: row.get(1)?,
                strategy_name: row.get(2)?,
                symbol: row.get(3)?,
                action: action_str.parse().unwrap_or(TradeAction::Hold),
                conviction: row.get(5)?,
                price_at_signal: row.get(6)?,
                reason: row.get(7)?,
                raw_analysis: row.get(8)?,
                stop_loss: row.get(9)?,
                take_profit: row.get(10)?,
                created_at_ms: row.get(11)?,
            })
        };

        let signals = if let Some(symbol) = symbol {
            let mut stmt = conn.prepare_cached(
                "SELECT id, agent_id, strategy_name, symbol, action, conviction, \
                        price_at_signal, reason, raw_analysis, stop_loss, take_profit, created_at \
                 FROM agent_signals WHERE symbol = ?1 ORDER BY created_at DESC LIMIT ?2",
            )?;
            stmt.query_map(params![symbol, limit], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            let mut stmt = conn.prepare_cached(
                "SELECT id, agent_id, strategy_name, symbol, action, conviction, \
                        price_at_signal, reason, raw_analysis, stop_loss, take_profit, created_at \
                 FROM agent_signals ORDER BY created_at DESC LIMIT ?1",
            )?;
            stmt.query_map(params![limit], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_signal(symbol: &str, action: TradeAction) -> AgentSignal {
        AgentSignal {
            id: None,
            agent_id: Some("agent-1".into()),
            strategy_name: Some("ta-core".into()),
            symbol: symbol.into(),
            action,
            conviction: 72.0,
            price_at_signal: Some(65000.0),
            reason: Some("golden cross on 1h".into()),
            raw_analysis: None,
            stop_loss: Some(63000.0),
            take_profit: Some(68000.0),
            created_at_ms: 0,
        }
    }

    #[test]
    fn insert_then_list_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .insert_agent_signal(&sample_signal("BTCUSDT", TradeAction::Buy))
            .unwrap();
        assert!(id > 0);

        let signals = store.list_agent_signals(None, 10).unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].symbol, "BTCUSDT");
        assert_eq!(signals[0].action, TradeAction::Buy);
    }

    #[test]
    fn empty_symbol_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let mut bad = sample_signal("BTCUSDT", TradeAction::Hold);
        bad.symbol = "   ".into();
        let result = store.insert_agent_signal(&bad);
        assert!(result.is_err());
    }

    #[test]
    fn list_filters_by_symbol() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_agent_signal(&sample_signal("BTCUSDT", TradeAction::Buy))
            .unwrap();
        store
            .insert_agent_signal(&sample_signal("ETHUSDT", TradeAction::Sell))
            .unwrap();

        let btc_only = store.list_agent_signals(Some("BTCUSDT"), 10).unwrap();
        assert_eq!(btc_only.len(), 1);
        assert_eq!(btc_only[0].symbol, "BTCUSDT");
    }

    #[test]
    fn list_returns_reverse_chronological_order() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_agent_signal(&sample_signal("BTCUSDT", TradeAction::Buy))
            .unwrap();
        store
            .insert_agent_signal(&sample_signal("BTCUSDT", TradeAction::Sell))
            .unwrap();

        let signals = store.list_agent_signals(Some("BTCUSDT"), 10).unwrap();
        assert_eq!(signals.len(), 2);
        assert!(signals[0].id.unwrap() > signals[1].id.unwrap());
    }
}
