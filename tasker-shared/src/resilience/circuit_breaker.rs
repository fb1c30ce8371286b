//! Generic circuit breaker state machine.
//!
//! Protects the event bus, event store, and LLM client boundaries from
//! cascading failures (`spec.md` §7: transport errors retry with bounded
//! backoff; persistent failure should stop hammering a dead collaborator).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::resilience::{CircuitBreakerBehavior, CircuitBreakerMetrics, CircuitState};

/// Tunables for a [`CircuitBreaker`] instance.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `Closed` state before tripping to `Open`.
    pub failure_threshold: u32,
    /// How long to stay `Open` before allowing a probe call in `HalfOpen`.
    pub timeout: Duration,
    /// Consecutive successes in `HalfOpen` before closing the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// A named circuit breaker guarding calls to one external collaborator.
///
/// State transitions: `Closed -[failure_threshold consecutive failures]->
/// Open -[timeout elapses]-> HalfOpen -[success_threshold consecutive
/// successes]-> Closed`; any failure while `HalfOpen` reopens immediately.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
    opened_at: Mutex<Option<Instant>>,
    consecutive_failures: AtomicU32,
    half_open_successes: AtomicU32,
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(CircuitState::Closed),
            opened_at: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
        }
    }

    /// Transitions `Open` to `HalfOpen` once the recovery timeout has
    /// elapsed, then reports whether a call may proceed.
    fn should_allow_inner(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .lock()
                    .unwrap()
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.timeout {
                    *state = CircuitState::HalfOpen;
                    self.half_open_successes.store(0, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success_manual(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        self.success_count.fetch_add(1, Ordering::SeqCst);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        match *state {
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    *state = CircuitState::Closed;
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure_manual(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        self.failure_count.fetch_add(1, Ordering::SeqCst);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        match *state {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    *state = CircuitState::Open;
                    *self.opened_at.lock().unwrap() = Some(Instant::now());
                    tracing::warn!(circuit_breaker = %self.name, failures, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                *self.opened_at.lock().unwrap() = Some(Instant::now());
                tracing::warn!(circuit_breaker = %self.name, "circuit breaker reopened after half-open failure");
            }
            CircuitState::Open => {}
        }
    }
}

impl CircuitBreakerBehavior for CircuitBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> CircuitState {
        *self.state.lock().unwrap()
    }

    fn should_allow(&self) -> bool {
        self.should_allow_inner()
    }

    fn record_success(&self, duration: Duration) {
        self.record_success_manual(duration);
    }

    fn record_failure(&self, duration: Duration) {
        self.record_failure_manual(duration);
    }

    fn is_healthy(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    fn force_open(&self) {
        *self.state.lock().unwrap() = CircuitState::Open;
        *self.opened_at.lock().unwrap() = Some(Instant::now());
    }

    fn force_closed(&self) {
        *self.state.lock().unwrap() = CircuitState::Closed;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.half_open_successes.store(0, Ordering::SeqCst);
    }

    fn metrics(&self) -> CircuitBreakerMetrics {
        let total_calls = self.total_calls.load(Ordering::SeqCst);
        let success_count = self.success_count.load(Ordering::SeqCst);
        let failure_count = self.failure_count.load(Ordering::SeqCst);
        let total_duration = Duration::from_nanos(self.total_duration_nanos.load(Ordering::SeqCst));
        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            consecutive_failures: u64::from(self.consecutive_failures.load(Ordering::SeqCst)),
            half_open_calls: u64::from(self.half_open_successes.load(Ordering::SeqCst)),
            total_duration,
            current_state: self.state(),
            failure_rate: if total_calls == 0 {
                0.0
            } else {
                failure_count as f64 / total_calls as f64
            },
            success_rate: if total_calls == 0 {
                0.0
            } else {
                success_count as f64 / total_calls as f64
            },
            average_duration: if total_calls == 0 {
                Duration::ZERO
            } else {
                total_duration / total_calls as u32
            },
        }
    }
}
