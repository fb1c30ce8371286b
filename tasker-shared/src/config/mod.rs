//! # Engine Configuration
//!
//! Configuration types for every engine component, loaded from a base TOML
//! file plus environment-specific overrides and `TASKER_`-prefixed
//! environment variables, in the style of the teacher's layered
//! `config/tasker/base/*.toml` + `environments/{env}/*.toml` convention.
//!
//! ## Loading
//!
//! [`EngineConfig::load`] reads `config/base.toml`, then merges
//! `config/environments/{env}.toml` (env defaults to `development`), then
//! merges environment variables prefixed `TASKER__` (double underscore as
//! the nesting separator, e.g. `TASKER__BUS__NACK_RESEND_SLEEP_MS=500`).

mod bus;
mod circuit_breaker;
mod scheduler;
mod state_service;
mod store;
mod worker;

pub use bus::EventBusConfig;
pub use circuit_breaker::CircuitBreakerConfig;
pub use scheduler::SchedulerConfig;
pub use state_service::StateServiceConfig;
pub use store::StoreConfig;
pub use worker::{ExecutionWorkerConfig, PlanningWorkerConfig};

use serde::{Deserialize, Serialize};

use crate::errors::TaskerResult;

/// Top-level configuration for the engine binary, aggregating every
/// component's settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub bus: EventBusConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub state_service: StateServiceConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub planning_worker: PlanningWorkerConfig,
    #[serde(default)]
    pub execution_worker: ExecutionWorkerConfig,
}

impl EngineConfig {
    /// Load configuration from `config/base.toml`, overlay
    /// `config/environments/{env}.toml`, then overlay `TASKER__`-prefixed
    /// environment variables. Missing files are tolerated; missing fields
    /// fall back to `Default`.
    pub fn load(env: &str) -> TaskerResult<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/base").required(false))
            .add_source(
                config::File::with_name(&format!("config/environments/{env}")).required(false),
            )
            .add_source(
                config::Environment::with_prefix("TASKER")
                    .separator("__")
                    .try_parsing(true),
            );

        let raw = builder
            .build()
            .map_err(|e| crate::errors::TaskerError::config_error(e.to_string()))?;

        raw.try_deserialize()
            .map_err(|e| crate::errors::TaskerError::config_error(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_no_files_falls_back_to_defaults() {
        let config = EngineConfig::load("test_nonexistent_env").unwrap();
        assert_eq!(config.bus, EventBusConfig::default());
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }
}
