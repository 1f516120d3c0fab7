// =============================================================================
// Rate-Limit Tracker — monitors exchange API usage to avoid 429s
// =============================================================================
//
// The exchange enforces a request-weight budget: 1200 per minute, hard-capped
// here at 1000. The tracker reads the `X-MBX-USED-WEIGHT-1M` response header
// after every request and keeps an atomic counter that any thread may query
// lock-free — operational visibility alongside the token-bucket limiter that
// actually paces outbound requests.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// Hard ceiling at which we refuse to send additional requests.
const WEIGHT_HARD_LIMIT: u32 = 1000;
/// Soft warning threshold.
const WEIGHT_WARN_THRESHOLD: u32 = 800;

/// Thread-safe rate-limit tracker backed by an atomic counter.
pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
}

/// Immutable snapshot of the current rate-limit state (suitable for
/// serialisation into an operational status payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub used_weight_1m: u32,
}

impl RateLimitTracker {
    /// Create a new tracker with the counter at zero.
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
        }
    }

    /// Update the weight counter from the HTTP response headers returned by
    /// the exchange. The only header consulted is `X-MBX-USED-WEIGHT-1M`.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        if let Some(val) = headers.get("X-MBX-USED-WEIGHT-1M") {
            if let Ok(s) = val.to_str() {
                if let Ok(w) = s.parse::<u32>() {
                    let prev = self.used_weight_1m.swap(w, Ordering::Relaxed);
                    if w >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
                        warn!(
                            used_weight = w,
                            hard_limit = WEIGHT_HARD_LIMIT,
                            "rate-limit weight crossed warning threshold"
                        );
                    } else if w >= WEIGHT_WARN_THRESHOLD {
                        warn!(used_weight = w, "rate-limit weight remains above warning threshold");
                    }
                    debug!(used_weight_1m = w, "rate-limit weight updated from header");
                }
            }
        }
    }

    /// Return `true` if we can afford to spend `weight` more request weight
    /// without exceeding the hard limit.
    pub fn can_send_request(&self, weight: u32) -> bool {
        let current = self.used_weight_1m.load(Ordering::Relaxed);
        let allowed = current + weight <= WEIGHT_HARD_LIMIT;
        if !allowed {
            warn!(
                current_weight = current,
                requested_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request blocked — would exceed rate-limit"
            );
        }
        allowed
    }

    /// Reset the 1-minute weight counter (call from a periodic timer).
    pub fn reset_1m_weight(&self) {
        self.used_weight_1m.store(0, Ordering::Relaxed);
    }

    /// Produce a serialisable snapshot of the current counter.
    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            used_weight_1m: self.used_weight_1m.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &self.used_weight_1m.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_send_request_respects_hard_limit() {
        let tracker = RateLimitTracker::new();
        assert!(tracker.can_send_request(500));

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("X-MBX-USED-WEIGHT-1M", "950".parse().unwrap());
        tracker.update_from_headers(&headers);

        assert!(!tracker.can_send_request(100));
    }

    #[test]
    fn reset_1m_weight_clears_the_counter() {
        let tracker = RateLimitTracker::new();
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("X-MBX-USED-WEIGHT-1M", "900".parse().unwrap());
        tracker.update_from_headers(&headers);
        assert_eq!(tracker.snapshot().used_weight_1m, 900);

        tracker.reset_1m_weight();
        assert_eq!(tracker.snapshot().used_weight_1m, 0);
    }
}
