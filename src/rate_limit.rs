// =============================================================================
// Token-Bucket Rate Limiter + Concurrency Gate — C1
// =============================================================================
//
// Guards outbound K-line history requests against the exchange's public
// rate limits. Two independent mechanisms compose here:
//
//   - a token bucket (`max_rate` tokens/sec, `burst` capacity) that callers
//     must acquire a token from before sending a request;
//   - a `tokio::sync::Semaphore` that caps how many K-line requests may be
//     in flight at once, independent of the token rate.
//
// Both are cheap to clone (`Arc` inside) and safe to share across collector
// tasks.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Diagnostic snapshot of the limiter's internal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterSnapshot {
    pub tokens_available: f64,
    pub max_rate: f64,
    pub burst: u32,
    pub concurrency_available: usize,
    pub concurrency_cap: usize,
    pub requests_issued: u64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter paired with a concurrency gate.
///
/// `max_rate` tokens are added per second, capped at `burst`. A caller
/// awaits [`acquire`](Self::acquire) before sending a request; the returned
/// guard holds the concurrency permit until dropped.
pub struct RateLimiter {
    max_rate: f64,
    burst: u32,
    bucket: Mutex<BucketState>,
    semaphore: Arc<Semaphore>,
    concurrency_cap: usize,
    requests_issued: AtomicU64,
}

/// RAII guard held while a request is in flight. Drops the concurrency
/// permit automatically.
pub struct RateLimitPermit {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(max_rate: f64, burst: u32, concurrency_cap: usize) -> Self {
        Self {
            max_rate,
            burst,
            bucket: Mutex::new(BucketState {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
            semaphore: Arc::new(Semaphore::new(concurrency_cap)),
            concurrency_cap,
            requests_issued: AtomicU64::new(0),
        }
    }

    /// Construct from the configured rate-limit parameters (C1 defaults:
    /// `max_rate=8.0`, `burst=12`, `concurrency_cap=3`).
    pub fn from_params(max_rate: f64, burst: u32, concurrency_cap: usize) -> Self {
        Self::new(max_rate, burst, concurrency_cap)
    }

    /// Wait for both a token and a concurrency permit, then return a guard
    /// that releases the permit on drop. The token itself is spent (not
    /// held) — refill happens independently of how long the request takes.
    pub async fn acquire(&self) -> RateLimitPermit {
        self.wait_for_token().await;

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("rate limiter semaphore closed unexpectedly");

        self.requests_issued.fetch_add(1, Ordering::Relaxed);

        RateLimitPermit { _permit: permit }
    }

    async fn wait_for_token(&self) {
        loop {
            let wait = {
                let mut state = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.max_rate).min(self.burst as f64);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.max_rate))
                }
            };

            match wait {
                None => return,
                Some(d) => {
                    trace!(wait_ms = d.as_millis() as u64, "rate limiter backpressure");
                    tokio::time::sleep(d).await;
                }
            }
        }
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let tokens_available = self
            .bucket
            .try_lock()
            .map(|s| s.tokens)
            .unwrap_or(f64::NAN);

        RateLimiterSnapshot {
            tokens_available,
            max_rate: self.max_rate,
            burst: self.burst,
            concurrency_available: self.semaphore.available_permits(),
            concurrency_cap: self.concurrency_cap,
            requests_issued: self.requests_issued.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_succeeds_within_burst_without_delay() {
        let limiter = RateLimiter::new(8.0, 12, 3);
        let start = Instant::now();
        for _ in 0..12 {
            let _permit = limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn snapshot_reports_concurrency_cap() {
        let limiter = RateLimiter::new(8.0, 12, 3);
        let snap = limiter.snapshot();
        assert_eq!(snap.concurrency_cap, 3);
        assert_eq!(snap.concurrency_available, 3);
        assert_eq!(snap.burst, 12);
    }

    #[tokio::test]
    async fn concurrency_gate_limits_simultaneous_permits() {
        let limiter = Arc::new(RateLimiter::new(1000.0, 1000, 2));
        let p1 = limiter.acquire().await;
        let p2 = limiter.acquire().await;
        assert_eq!(limiter.semaphore.available_permits(), 0);
        drop(p1);
        assert_eq!(limiter.semaphore.available_permits(), 1);
        drop(p2);
    }

    #[tokio::test]
    async fn requests_issued_counter_increments() {
        let limiter = RateLimiter::new(1000.0, 1000, 3);
        let _p1 = limiter.acquire().await;
        let _p2 = limiter.acquire().await;
        assert_eq!(limiter.snapshot().requests_issued, 2);
    }
}
