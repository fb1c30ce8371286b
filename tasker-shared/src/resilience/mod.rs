//! Circuit breaker primitives shared across the bus, store, and LLM
//! boundaries.
//!
//! A single generic [`CircuitBreaker`] implements the state machine;
//! component-specific wrappers (bus publisher, event store, LLM client)
//! hold one and expose [`CircuitBreakerBehavior`] for uniform health
//! reporting.

mod behavior;
mod circuit_breaker;
mod metrics;

pub use behavior::CircuitBreakerBehavior;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use metrics::{CircuitBreakerMetrics, MetricsCollector, TracingMetricsCollector};

use serde::{Deserialize, Serialize};

/// The three states of the circuit breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation; calls pass through.
    Closed,
    /// Failing fast; calls are rejected until the recovery timeout elapses.
    Open,
    /// Testing recovery; a limited number of calls are allowed through.
    HalfOpen,
}
