// =============================================================================
// Typed error kinds — collector / store seam
// =============================================================================
//
// Internal components surface one of these kinds; the API layer maps them to
// HTTP status codes. Everything above the seam (scheduler, TA strategy)
// works with `anyhow::Result` the way the teacher's own call sites do.
// =============================================================================

use thiserror::Error;

/// Error surfaced by a collector client at the I/O seam.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Connection reset / timeout that exhausted all retries.
    #[error("transient network failure for {source}: {detail}")]
    Transient { source: String, detail: String },

    /// HTTP 429 that exhausted `max_retries`.
    #[error("rate limited by {source} after {attempts} attempts")]
    RateLimited { source: String, attempts: u32 },

    /// HTTP 418 (or equivalent hard block) — no retry is attempted.
    #[error("hard block (IP ban) from {source}")]
    HardBlocked { source: String },

    /// The response parsed but carried no usable data.
    #[error("no data returned by {source}")]
    NoData { source: String },

    /// Response body could not be decoded into the expected shape.
    #[error("malformed response from {source}: {detail}")]
    Malformed { source: String, detail: String },
}

impl CollectorError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CollectorError::HardBlocked { .. })
    }
}

/// Error surfaced by the store DAO layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("transaction failed: {0}")]
    Transaction(String),
}

/// Validation failure at an API boundary — maps to HTTP 400.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("unknown timeframe token: {0}")]
    UnknownTimeframe(String),

    #[error("unknown action, expected BUY/SELL/HOLD, got: {0}")]
    UnknownAction(String),
}
