use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time spent open before a trial call is allowed.
    pub cooldown: Duration,
    /// Per-attempt deadline. Exceeding it counts as a failure.
    pub attempt_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit open for {name}, retry in {retry_in:?}")]
    Open { name: String, retry_in: Duration },

    #[error("{name} timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// True when the operation was never invoked.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

struct BreakerInner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Guards a flaky async dependency.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    /// Run `operation` unless the circuit is open.
    ///
    /// Once the cooldown has elapsed a single trial call is let through.
    /// Other callers are refused until it settles.
    pub async fn execute<F, Fut, T, E>(
        &self,
        name: &str,
        operation: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _trial = self.admit(name)?;

        match tokio::time::timeout(self.config.attempt_timeout, operation()).await {
            Ok(Ok(value)) => {
                self.on_success(name);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.on_failure(name);
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                self.on_failure(name);
                Err(BreakerError::Timeout {
                    name: name.to_string(),
                    after: self.config.attempt_timeout,
                })
            }
        }
    }

    fn admit<E>(&self, name: &str) -> Result<Option<TrialGuard<'_>>, BreakerError<E>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => return Ok(None),
            CircuitState::HalfOpen if inner.trial_in_flight => {
                return Err(BreakerError::Open {
                    name: name.to_string(),
                    retry_in: self.config.attempt_timeout,
                });
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }

        let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
        if elapsed >= self.config.cooldown {
            debug!("{}: cooldown elapsed, half-opening circuit", name);
            inner.state = CircuitState::HalfOpen;
            inner.trial_in_flight = true;
            return Ok(Some(TrialGuard { breaker: self }));
        }

        Err(BreakerError::Open {
            name: name.to_string(),
            retry_in: self.config.cooldown - elapsed,
        })
    }

    fn on_success(&self, name: &str) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!("{}: circuit closed", name);
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    fn on_failure(&self, name: &str) {
        let mut inner = self.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.trial_in_flight = false;

        let trip = inner.state == CircuitState::HalfOpen
            || inner.failures >= self.config.failure_threshold;
        if trip {
            warn!("{}: circuit opened after {} consecutive failures", name, inner.failures);
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Held by the half-open trial call. A trial dropped before it settles
/// returns the circuit to open with its cooldown already elapsed.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.breaker.lock();
        if inner.trial_in_flight {
            inner.trial_in_flight = false;
            if inner.state == CircuitState::HalfOpen {
                inner.state = CircuitState::Open;
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    type Outcome<T> = Result<T, BreakerError<&'static str>>;

    async fn fail(breaker: &CircuitBreaker, calls: &AtomicU32) -> Outcome<()> {
        breaker
            .execute("get-session", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("boom")
            })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker, calls: &AtomicU32) -> Outcome<u8> {
        breaker
            .execute("get-session", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &'static str>(7)
            })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_three_failures_and_short_circuits() {
        let breaker = CircuitBreaker::default();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            assert!(matches!(fail(&breaker, &calls).await, Err(BreakerError::Inner("boom"))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let fourth = succeed(&breaker, &calls).await;
        assert!(fourth.unwrap_err().is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 3, "open circuit must not invoke the operation");
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_success_closes_the_circuit() {
        let breaker = CircuitBreaker::default();
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let _ = fail(&breaker, &calls).await;
        }

        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(succeed(&breaker, &calls).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_immediately() {
        let breaker = CircuitBreaker::default();
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let _ = fail(&breaker, &calls).await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        assert!(matches!(fail(&breaker, &calls).await, Err(BreakerError::Inner(_))));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(succeed(&breaker, &calls).await.unwrap_err().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_counts_as_failure() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });

        let result = breaker
            .execute("get-session", || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, &'static str>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Timeout { .. })));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let breaker = CircuitBreaker::default();
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.failure_count(), 2);

        succeed(&breaker, &calls).await.unwrap();
        assert_eq!(breaker.failure_count(), 0);

        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    async fn trip(breaker: &CircuitBreaker, calls: &AtomicU32) {
        for _ in 0..3 {
            let _ = fail(breaker, calls).await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_a_single_trial() {
        let breaker = CircuitBreaker::default();
        let calls = AtomicU32::new(0);
        trip(&breaker, &calls).await;

        let trial = breaker.execute("get-session", || async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, &'static str>(1)
        });
        tokio::pin!(trial);
        assert!(futures_util::poll!(&mut trial).is_pending());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(succeed(&breaker, &calls).await.unwrap_err().is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        assert_eq!(trial.await.unwrap(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(succeed(&breaker, &calls).await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trial_lets_the_next_call_try() {
        let breaker = CircuitBreaker::default();
        let calls = AtomicU32::new(0);
        trip(&breaker, &calls).await;

        let stalled = breaker.execute("get-session", || async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, &'static str>(0)
        });
        assert!(tokio::time::timeout(Duration::from_millis(100), stalled).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        assert_eq!(succeed(&breaker, &calls).await.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
