use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Guards the broker producer. While the broker is down the publisher fails
// fast instead of holding outbox claims for a full acknowledgement timeout.
//
// - Closed: sends pass through; consecutive broker failures are counted
// - Open: sends rejected until `open_for` has elapsed
// - HalfOpen: one probe at a time; `close_after` good probes close it
//
// Only failures the caller classifies as broker-wide trip the breaker. A
// broker rejecting one malformed message says nothing about the others.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding used by the metrics registry
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive broker failures that open the circuit
    pub trip_after: u32,
    pub open_for: Duration,
    /// Successful probes needed to close from half-open
    pub close_after: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            trip_after: 5,
            open_for: Duration::from_secs(30),
            close_after: 3,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit open, next probe in {retry_in:?}")]
    Open { retry_in: Duration },

    #[error("{0}")]
    Failed(E),
}

/// Point-in-time view for health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub retry_in: Option<Duration>,
}

#[derive(Debug)]
enum Phase {
    Closed { failures: u32 },
    Open { since: Instant, failures: u32 },
    HalfOpen { successes: u32, probing: bool },
}

pub struct CircuitBreaker {
    phase: Mutex<Phase>,
    config: CircuitBreakerConfig,
}

/// An admitted send whose future was dropped (an outer timeout fired)
/// counts as a broker failure, so a half-open probe is always settled.
struct InFlight<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Send abandoned before the broker answered");
            self.breaker.on_failure(true);
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            phase: Mutex::new(Phase::Closed { failures: 0 }),
            config,
        }
    }

    /// Run `operation` unless the circuit is open.
    ///
    /// `trips` decides whether an error counts against the broker.
    pub async fn call<F, T, E>(
        &self,
        operation: F,
        trips: impl Fn(&E) -> bool,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        self.admit()?;

        let mut in_flight = InFlight {
            breaker: self,
            settled: false,
        };
        let result = operation.await;
        in_flight.settled = true;

        match result {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure(trips(&err));
                Err(CircuitBreakerError::Failed(err))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.snapshot().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        match *self.lock() {
            Phase::Closed { failures } => CircuitSnapshot {
                state: CircuitState::Closed,
                consecutive_failures: failures,
                retry_in: None,
            },
            Phase::Open { since, failures } => CircuitSnapshot {
                state: CircuitState::Open,
                consecutive_failures: failures,
                retry_in: Some(self.config.open_for.saturating_sub(since.elapsed())),
            },
            Phase::HalfOpen { .. } => CircuitSnapshot {
                state: CircuitState::HalfOpen,
                consecutive_failures: 0,
                retry_in: None,
            },
        }
    }

    /// Operator override: close the circuit now
    pub fn reset(&self) {
        *self.lock() = Phase::Closed { failures: 0 };
        tracing::info!("Circuit breaker manually reset");
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut phase = self.lock();
        match *phase {
            Phase::Closed { .. } => Ok(()),
            Phase::Open { since, .. } => {
                let elapsed = since.elapsed();
                if elapsed < self.config.open_for {
                    return Err(CircuitBreakerError::Open {
                        retry_in: self.config.open_for - elapsed,
                    });
                }
                tracing::info!("Circuit breaker half-open, probing broker");
                *phase = Phase::HalfOpen {
                    successes: 0,
                    probing: true,
                };
                Ok(())
            }
            Phase::HalfOpen { successes, probing } => {
                if probing {
                    return Err(CircuitBreakerError::Open {
                        retry_in: Duration::ZERO,
                    });
                }
                *phase = Phase::HalfOpen {
                    successes,
                    probing: true,
                };
                Ok(())
            }
        }
    }

    fn on_success(&self) {
        let mut phase = self.lock();
        match *phase {
            Phase::Closed { .. } => *phase = Phase::Closed { failures: 0 },
            Phase::HalfOpen { successes, .. } => {
                let successes = successes + 1;
                if successes >= self.config.close_after {
                    tracing::info!(successes, "Circuit breaker closed");
                    *phase = Phase::Closed { failures: 0 };
                } else {
                    *phase = Phase::HalfOpen {
                        successes,
                        probing: false,
                    };
                }
            }
            // a send admitted before the circuit opened
            Phase::Open { .. } => {}
        }
    }

    fn on_failure(&self, trips: bool) {
        let mut phase = self.lock();
        match *phase {
            Phase::Closed { failures } if trips => {
                let failures = failures + 1;
                if failures >= self.config.trip_after {
                    tracing::warn!(failures, "Circuit breaker opened");
                    *phase = Phase::Open {
                        since: Instant::now(),
                        failures,
                    };
                } else {
                    *phase = Phase::Closed { failures };
                }
            }
            Phase::Closed { .. } => {}
            Phase::HalfOpen { successes, .. } if !trips => {
                *phase = Phase::HalfOpen {
                    successes,
                    probing: false,
                };
            }
            Phase::HalfOpen { .. } => {
                tracing::warn!("Probe failed, circuit breaker reopened");
                *phase = Phase::Open {
                    since: Instant::now(),
                    failures: self.config.trip_after,
                };
            }
            Phase::Open { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(trip_after: u32, open_for: Duration, close_after: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            trip_after,
            open_for,
            close_after,
        })
    }

    async fn fail(cb: &CircuitBreaker, broker_wide: bool) {
        let _ = cb.call(async { Err::<(), _>("send failed") }, |_| broker_wide).await;
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_broker_failures() {
        let cb = breaker(3, Duration::from_secs(60), 1);

        fail(&cb, true).await;
        fail(&cb, true).await;
        assert_eq!(cb.snapshot().consecutive_failures, 2);
        fail(&cb, true).await;
        assert_eq!(cb.state(), CircuitState::Open);

        let result = cb.call(async { Ok::<_, &str>(()) }, |_| true).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
        assert!(cb.snapshot().retry_in.is_some());
    }

    #[tokio::test]
    async fn test_message_level_failures_do_not_trip() {
        let cb = breaker(2, Duration::from_secs(60), 1);

        for _ in 0..5 {
            fail(&cb, false).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        fail(&cb, true).await;
        let _ = cb.call(async { Ok::<_, &str>(()) }, |_| true).await;
        fail(&cb, true).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_admits_one_probe_then_closes() {
        let cb = breaker(1, Duration::from_millis(30), 2);
        fail(&cb, true).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (probe_tx, probe_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = cb.call(
            async move {
                let _ = probe_rx.await;
                Ok::<_, &str>(())
            },
            |_| true,
        );
        let concurrent = async {
            let second = cb.call(async { Ok::<_, &str>(()) }, |_| true).await;
            let _ = probe_tx.send(());
            second
        };
        let (first, second) = tokio::join!(probe, concurrent);

        assert!(first.is_ok());
        assert!(matches!(second, Err(CircuitBreakerError::Open { .. })));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.call(async { Ok::<_, &str>(()) }, |_| true).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_abandoned_half_open_send_reopens_instead_of_wedging() {
        let cb = breaker(1, Duration::from_millis(20), 1);
        fail(&cb, true).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let stalled = cb.call(std::future::pending::<Result<(), &str>>(), |_| true);
        assert!(tokio::time::timeout(Duration::from_millis(10), stalled).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        cb.call(async { Ok::<_, &str>(()) }, |_| true).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_abandoned_sends_count_while_closed() {
        let cb = breaker(2, Duration::from_secs(60), 1);

        for _ in 0..2 {
            let stalled = cb.call(std::future::pending::<Result<(), &str>>(), |_| true);
            let _ = tokio::time::timeout(Duration::from_millis(5), stalled).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_failed_probe_reopens_and_reset_closes() {
        let cb = breaker(1, Duration::from_millis(20), 1);
        fail(&cb, true).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        fail(&cb, true).await;
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.state().as_gauge(), 0);
    }
}
