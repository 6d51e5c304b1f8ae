//! Three-state circuit breaker.
//!
//! ```text
//!   CLOSED --(failure_count >= threshold)--> OPEN
//!   OPEN   --(now >= next_attempt_time)----> HALF_OPEN (one trial call admitted)
//!   HALF_OPEN --other callers--> rejected while the trial call is in flight
//!   HALF_OPEN --success--> CLOSED (failure_count = 0)
//!   HALF_OPEN --failure--> counted again, re-opens
//! ```

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{CallError, CallResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time copy of the breaker state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<Instant>,
    /// Set only while (or after) the breaker is OPEN.
    pub next_attempt_time: Option<Instant>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    next_attempt_time: Option<Instant>,
    /// Admission time of the outstanding half-open trial call. A trial whose
    /// caller never reports back stops blocking after `reset_timeout`.
    trial_started_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    failure_window: Duration,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// `failure_window` bounds how far apart two failures may be and still
    /// count towards the same trip.
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        failure_window: Duration,
        reset_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            failure_window,
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                next_attempt_time: None,
                trial_started_at: None,
            }),
        }
    }

    /// Admission check. OPEN rejects until `next_attempt_time`, then moves to
    /// HALF_OPEN and lets the caller through as the single trial call. Other
    /// callers are rejected until that trial call settles.
    pub fn check(&self, endpoint: &str) -> CallResult<()> {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => match inner.trial_started_at {
                Some(started) if now < started + self.reset_timeout => {
                    Err(CallError::BreakerOpen {
                        endpoint: endpoint.to_string(),
                        retry_in: started + self.reset_timeout - now,
                    })
                }
                _ => {
                    inner.trial_started_at = Some(now);
                    Ok(())
                }
            },
            CircuitState::Open => match inner.next_attempt_time {
                Some(next) if now < next => Err(CallError::BreakerOpen {
                    endpoint: endpoint.to_string(),
                    retry_in: next - now,
                }),
                _ => {
                    info!(breaker = %self.name, "circuit breaker half-open, admitting trial call");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_started_at = Some(now);
                    Ok(())
                }
            },
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            info!(breaker = %self.name, "trial call succeeded, circuit breaker closed");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.trial_started_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();

        if inner.state == CircuitState::Closed {
            if let Some(last) = inner.last_failure_time {
                if now.duration_since(last) > self.failure_window {
                    inner.failure_count = 0;
                }
            }
        }

        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(now);
        inner.trial_started_at = None;

        if inner.failure_count >= self.failure_threshold && inner.state != CircuitState::Open {
            inner.state = CircuitState::Open;
            inner.next_attempt_time = Some(now + self.reset_timeout);
            warn!(
                breaker = %self.name,
                failures = inner.failure_count,
                reset_ms = self.reset_timeout.as_millis() as u64,
                "circuit breaker opened"
            );
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_time: inner.last_failure_time,
            next_attempt_time: inner.next_attempt_time,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
