// =============================================================================
// Store (C7) — embedded SQL persistence
// =============================================================================
//
// A thin `rusqlite` wrapper providing typed DAOs over four tables:
// `kline_cache`, `market_cache`, `crawled_data`, `agent_signals`. Connection
// pragmas favor write throughput for a single-writer, many-reader workload:
// WAL journal mode, NORMAL synchronous — the same combination the scheduler
// needs to keep incremental syncs and API reads from blocking each other.
// =============================================================================

pub mod bars;
pub mod crawled;
pub mod market_cache;
pub mod signals;

use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::info;

/// Shared handle around a single `rusqlite::Connection`.
///
/// The spec requires multi-TF reads to run strictly serially against one
/// DB handle rather than fanning out across connections, so a single
/// `Mutex<Connection>` is the correct shape here rather than a pool.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if absent) the SQLite file at `path`, set WAL +
    /// NORMAL pragmas, and run schema migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create data dir {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to set journal_mode=WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("failed to set synchronous=NORMAL")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;

        info!(path = %path.display(), "store opened (WAL, synchronous=NORMAL)");
        Ok(store)
    }

    /// Open an in-memory database, for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kline_cache (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol      TEXT NOT NULL,
                interval    TEXT NOT NULL,
                open_time   INTEGER NOT NULL,
                close_time  INTEGER NOT NULL,
                open        REAL NOT NULL,
                high        REAL NOT NULL,
                low         REAL NOT NULL,
                close       REAL NOT NULL,
                volume      REAL NOT NULL,
                created_at  INTEGER NOT NULL,
                UNIQUE(symbol, interval, open_time)
            );
            CREATE INDEX IF NOT EXISTS ix_kline_symbol_interval
                ON kline_cache(symbol, interval);

            CREATE TABLE IF NOT EXISTS market_cache (
                symbol              TEXT PRIMARY KEY,
                price               REAL NOT NULL,
                change_pct_24h      REAL NOT NULL DEFAULT 0,
                high_24h            REAL,
                low_24h             REAL,
                volume_24h          REAL,
                updated_at          INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS crawled_data (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                data_type   TEXT NOT NULL,
                date        TEXT NOT NULL,
                value       REAL NOT NULL,
                raw         TEXT,
                created_at  INTEGER NOT NULL,
                UNIQUE(data_type, date)
            );
            CREATE INDEX IF NOT EXISTS ix_crawled_data_type ON crawled_data(data_type);

            CREATE TABLE IF NOT EXISTS agent_signals (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id            TEXT,
                strategy_name       TEXT,
                symbol              TEXT NOT NULL,
                action              TEXT NOT NULL,
                conviction          REAL NOT NULL,
                price_at_signal     REAL,
                reason              TEXT,
                raw_analysis        TEXT,
                stop_loss           REAL,
                take_profit         REAL,
                created_at          INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS ix_agent_signals_symbol ON agent_signals(symbol);
            "#,
        )?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_creates_all_tables() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.conn();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN \
                 ('kline_cache','market_cache','crawled_data','agent_signals')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 4);
    }

    #[test]
    fn migrate_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        store.migrate().unwrap();
    }
}
