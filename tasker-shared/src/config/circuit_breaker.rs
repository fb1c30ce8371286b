//! Shared circuit breaker configuration (`spec.md` §7), reused by every
//! component that guards a flaky boundary: the State Service's event bus
//! publish and Event Store append, and the workers' LLM calls.

use serde::{Deserialize, Serialize};

use crate::resilience::CircuitBreakerConfig as ResilienceCircuitBreakerConfig;

/// Serializable mirror of [`crate::resilience::CircuitBreakerConfig`] (which
/// holds a `Duration` and isn't directly `Deserialize`-friendly for TOML
/// seconds fields).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 30,
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn to_resilience_config(self) -> ResilienceCircuitBreakerConfig {
        ResilienceCircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: std::time::Duration::from_secs(self.recovery_timeout_seconds),
            success_threshold: self.success_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
    }

    #[test]
    fn test_to_resilience_config() {
        let config = CircuitBreakerConfig::default();
        let resilience = config.to_resilience_config();
        assert_eq!(resilience.failure_threshold, 5);
        assert_eq!(resilience.timeout.as_secs(), 30);
    }
}
