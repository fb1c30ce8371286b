//! Defines the `CircuitBreakerBehavior` trait that unifies all circuit
//! breaker implementations in the system. Each specialized circuit breaker
//! (bus publisher, event store, LLM client) implements this trait while
//! retaining domain-specific convenience methods.
//!
//! The trait is object-safe (`Send + Sync + Debug`) so that consumers can
//! work with `&dyn CircuitBreakerBehavior` when uniform access to any
//! breaker is needed (e.g., health reporting). Concrete types are preferred
//! in hot paths for zero-cost dispatch.

use std::time::Duration;

use crate::resilience::{CircuitBreakerMetrics, CircuitState};

/// Unified interface for all circuit breaker implementations.
pub trait CircuitBreakerBehavior: Send + Sync + std::fmt::Debug {
    /// The component name this circuit breaker protects.
    fn name(&self) -> &str;

    /// The current circuit state.
    fn state(&self) -> CircuitState;

    /// Whether the circuit allows the next call.
    fn should_allow(&self) -> bool;

    /// Record a successful operation with its duration.
    fn record_success(&self, duration: Duration);

    /// Record a failed operation with its duration.
    fn record_failure(&self, duration: Duration);

    /// Whether the circuit breaker considers the component healthy.
    fn is_healthy(&self) -> bool;

    /// Force the circuit to open state (emergency kill switch).
    fn force_open(&self);

    /// Force the circuit to closed state (emergency recovery).
    fn force_closed(&self);

    /// A metrics snapshot for observability.
    fn metrics(&self) -> CircuitBreakerMetrics;
}
