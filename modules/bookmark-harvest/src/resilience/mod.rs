//! Retry with backoff plus a circuit breaker, wrapped around every
//! externally-fallible step (page actions, session checks).
//!
//! The controller only reports: it never decides to abort a run. Callers look
//! at the returned error or at [`Resilience::health`] and decide themselves.

pub mod backoff;
pub mod breaker;

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use bookmark_common::{OpError, PipelineConfig};

pub use backoff::Backoff;
pub use breaker::{CircuitBreaker, CircuitState, HealthState};

pub struct Resilience {
    backoff: Backoff,
    max_attempts: u32,
    op_timeout: Duration,
    breaker: CircuitBreaker,
}

impl Resilience {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            backoff: Backoff::new(config.backoff_base(), config.backoff_max()),
            max_attempts: config.retry_max_attempts.max(1),
            op_timeout: config.operation_timeout(),
            breaker: CircuitBreaker::new(
                config.circuit_failure_threshold,
                config.circuit_cooldown(),
            ),
        }
    }

    /// Run `f` under the retry policy and breaker.
    ///
    /// Each attempt is bounded by the operation timeout. Transient errors are
    /// retried up to `retry_max_attempts` times; permanent errors return at
    /// once; an open breaker fails fast without calling `f`.
    pub async fn execute<T, F, Fut>(&self, op: &str, f: F) -> Result<T, OpError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OpError>>,
    {
        self.execute_with_timeout(op, self.op_timeout, f).await
    }

    /// [`execute`](Self::execute) with a per-attempt bound other than the
    /// configured operation timeout.
    pub async fn execute_with_timeout<T, F, Fut>(
        &self,
        op: &str,
        timeout: Duration,
        mut f: F,
    ) -> Result<T, OpError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OpError>>,
    {
        let mut attempts = 0u32;
        loop {
            if let Err(e) = self.breaker.try_acquire() {
                debug!(op, "Circuit open, failing fast");
                return Err(e);
            }

            let outcome = match tokio::time::timeout(timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(OpError::Timeout(format!(
                    "{op} exceeded {}ms",
                    timeout.as_millis()
                ))),
            };

            let error = match outcome {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(e) => e,
            };

            self.breaker.record_failure();
            attempts += 1;

            if !error.is_transient() {
                warn!(op, error = %error, "Permanent failure, not retrying");
                return Err(error);
            }
            if attempts >= self.max_attempts {
                warn!(op, attempts, error = %error, "Retries exhausted");
                return Err(OpError::RetriesExhausted {
                    attempts,
                    last: Box::new(error),
                });
            }
            if self.breaker.is_open() {
                warn!(op, attempts, error = %error, "Circuit opened mid-retry");
                return Err(OpError::CircuitOpen);
            }

            let delay = self.backoff.delay(attempts - 1);
            warn!(
                op,
                attempt = attempts,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, retrying after backoff"
            );
            tokio::time::sleep(delay).await;
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        self.op_timeout
    }

    pub fn health(&self) -> HealthState {
        self.breaker.health()
    }

    pub fn is_open(&self) -> bool {
        self.breaker.is_open()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig {
            retry_max_attempts: 3,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            circuit_failure_threshold: 5,
            circuit_cooldown_ms: 10_000,
            operation_timeout_ms: 2_000,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success() {
        let resilience = Resilience::new(&config());
        let calls = &AtomicU32::new(0);

        let result = resilience
            .execute("visible_items", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(OpError::Network("connection reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(resilience.health().is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let resilience = Resilience::new(&config());
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = resilience
            .execute("visible_items", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(OpError::AuthenticationRequired)
            })
            .await;

        assert_eq!(result, Err(OpError::AuthenticationRequired));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_last_error() {
        let resilience = Resilience::new(&config());

        let result: Result<(), _> = resilience
            .execute("scroll", || async move { Err(OpError::Detached("article[3]".into())) })
            .await;

        assert_eq!(
            result,
            Err(OpError::RetriesExhausted {
                attempts: 3,
                last: Box::new(OpError::Detached("article[3]".into())),
            })
        );
        assert_eq!(resilience.health().consecutive_failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_times_out() {
        let resilience = Resilience::new(&PipelineConfig {
            retry_max_attempts: 1,
            ..config()
        });

        let result: Result<(), _> = resilience
            .execute("navigate", || async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        match result {
            Err(OpError::RetriesExhausted { last, .. }) => {
                assert!(matches!(*last, OpError::Timeout(_)))
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn longer_bound_admits_slow_operation() {
        let resilience = Resilience::new(&PipelineConfig {
            retry_max_attempts: 1,
            ..config()
        });

        let result = resilience
            .execute_with_timeout("visible_items", Duration::from_secs(10), || async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(3)
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(resilience.operation_timeout(), Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_fails_fast_then_admits_one_probe() {
        let resilience = Resilience::new(&PipelineConfig {
            retry_max_attempts: 1,
            circuit_failure_threshold: 2,
            ..config()
        });
        let calls = &AtomicU32::new(0);
        let failing = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(OpError::Network("503".into()))
        };

        for _ in 0..2 {
            let _ = resilience.execute("scroll", failing).await;
        }
        assert_eq!(resilience.health().circuit_state, CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        for _ in 0..4 {
            assert_eq!(
                resilience.execute("scroll", failing).await,
                Err(OpError::CircuitOpen)
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2, "open circuit must not call through");

        tokio::time::advance(Duration::from_millis(10_000)).await;
        let _ = resilience.execute("scroll", failing).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3, "exactly one probe");
        assert_eq!(
            resilience.execute("scroll", failing).await,
            Err(OpError::CircuitOpen)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_trips_during_retries() {
        let resilience = Resilience::new(&PipelineConfig {
            retry_max_attempts: 10,
            circuit_failure_threshold: 2,
            ..config()
        });
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = resilience
            .execute("visible_items", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(OpError::Timeout("render".into()))
            })
            .await;

        assert_eq!(result, Err(OpError::CircuitOpen));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(resilience.is_open());
    }
}
