//! Token-bucket admission control.
//!
//! Tokens refill continuously at `requests_per_second` up to `burst_size`.
//! A caller that finds the bucket empty sleeps for one refill period
//! (`1000 / requests_per_second` ms) and then consumes the token that
//! accrued during the sleep. The bucket is never reset to a fixed value
//! after a wait, so concurrent waiters cannot each mint a free token.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by every call made through one client.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_second: f64,
    burst_size: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a full bucket.
    pub fn new(requests_per_second: f64, burst_size: u32) -> Self {
        let burst_size = f64::from(burst_size.max(1));
        Self {
            requests_per_second,
            burst_size,
            bucket: Mutex::new(Bucket {
                tokens: burst_size,
                last_refill: Instant::now(),
            }),
        }
    }

    /// One refill period.
    pub fn wait_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.requests_per_second)
    }

    /// Take one token, suspending the caller while the bucket is empty.
    pub async fn acquire(&self) {
        loop {
            if self.try_consume() {
                return;
            }
            let wait = self.wait_period();
            trace!(wait_ms = wait.as_millis() as u64, "rate limiter empty, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a token if one is available right now.
    pub fn try_consume(&self) -> bool {
        let mut bucket = self.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (after refill).
    pub fn available(&self) -> f64 {
        let mut bucket = self.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = f64::min(
            self.burst_size,
            bucket.tokens + elapsed * self.requests_per_second,
        );
        bucket.last_refill = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        // The bucket holds plain numbers; a poisoned guard is still usable.
        self.bucket.lock().unwrap_or_else(|e| e.into_inner())
    }
}
