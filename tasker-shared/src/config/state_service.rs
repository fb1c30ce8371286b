//! State Service configuration (`spec.md` §4.3).

use serde::{Deserialize, Serialize};

use crate::config::CircuitBreakerConfig;

fn default_consumer_group() -> String {
    "state-service".to_string()
}

/// Configuration for the State Service — the sole writer of task state.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StateServiceConfig {
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Circuit breaker guarding Event Store writes from the publish path.
    #[serde(default)]
    pub store_circuit_breaker: CircuitBreakerConfig,
    /// Circuit breaker guarding event bus publishes from the publish path.
    #[serde(default)]
    pub bus_circuit_breaker: CircuitBreakerConfig,
}

impl Default for StateServiceConfig {
    fn default() -> Self {
        Self {
            consumer_group: default_consumer_group(),
            store_circuit_breaker: CircuitBreakerConfig::default(),
            bus_circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StateServiceConfig::default();
        assert_eq!(config.consumer_group, "state-service");
        assert_eq!(config.store_circuit_breaker.failure_threshold, 5);
        assert_eq!(config.bus_circuit_breaker.failure_threshold, 5);
    }
}
