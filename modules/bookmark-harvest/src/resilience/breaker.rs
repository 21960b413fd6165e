use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use bookmark_common::OpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Snapshot of the breaker for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthState {
    pub consecutive_failures: u32,
    pub circuit_state: CircuitState,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl HealthState {
    pub fn is_healthy(&self) -> bool {
        self.circuit_state == CircuitState::Closed && self.consecutive_failures == 0
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    last_failure_at: Option<DateTime<Utc>>,
}

/// Consecutive-failure circuit breaker shared by every operation in one run.
///
/// `Closed` until `threshold` failures in a row, then `Open`: calls fail fast
/// with [`OpError::CircuitOpen`]. Once `cooldown` has elapsed the next call is
/// admitted as the single `HalfOpen` probe; its outcome closes the circuit or
/// re-opens it with a fresh cooldown.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
                last_failure_at: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admit a call or fail fast.
    pub fn try_acquire(&self) -> Result<(), OpError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|opened| opened.elapsed() >= self.cooldown);
                if cooled {
                    info!("Circuit cooldown elapsed, admitting probe");
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(OpError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(OpError::CircuitOpen)
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!("Probe succeeded, closing circuit");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure_at = Some(Utc::now());
        inner.probe_in_flight = false;

        let trip = match inner.state {
            CircuitState::HalfOpen | CircuitState::Open => true,
            CircuitState::Closed => inner.consecutive_failures >= self.threshold,
        };
        if trip {
            if inner.state != CircuitState::Open {
                warn!(
                    consecutive_failures = inner.consecutive_failures,
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "Circuit opened"
                );
            }
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn health(&self) -> HealthState {
        let inner = self.lock();
        HealthState {
            consecutive_failures: inner.consecutive_failures,
            circuit_state: inner.state,
            last_failure_at: inner.last_failure_at,
        }
    }
}
