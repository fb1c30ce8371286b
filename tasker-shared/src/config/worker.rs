//! Planning and Execution worker configuration (`spec.md` §4.5, §4.6).

use serde::{Deserialize, Serialize};

use crate::config::CircuitBreakerConfig;

fn default_max_planning_loops() -> u32 {
    3
}

fn default_planning_temperature() -> f32 {
    0.2
}

fn default_planning_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Configuration for the Planning Worker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlanningWorkerConfig {
    #[serde(default = "default_max_planning_loops")]
    pub max_planning_loops: u32,
    #[serde(default = "default_planning_temperature")]
    pub temperature: f32,
    #[serde(default = "default_planning_model")]
    pub model: String,
    /// Circuit breaker guarding calls to the `LlmClient`.
    #[serde(default)]
    pub llm_circuit_breaker: CircuitBreakerConfig,
}

impl Default for PlanningWorkerConfig {
    fn default() -> Self {
        Self {
            max_planning_loops: default_max_planning_loops(),
            temperature: default_planning_temperature(),
            model: default_planning_model(),
            llm_circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

fn default_max_turns() -> u32 {
    10
}

fn default_execution_temperature() -> f32 {
    0.1
}

fn default_execution_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_cancellation_poll_ms() -> u64 {
    500
}

/// Configuration for the Execution Worker's bounded ReAct loop.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExecutionWorkerConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_execution_temperature")]
    pub temperature: f32,
    #[serde(default = "default_execution_model")]
    pub model: String,
    /// How often, between turns, the loop checks the cancellation token.
    #[serde(default = "default_cancellation_poll_ms")]
    pub cancellation_poll_ms: u64,
    /// Circuit breaker guarding calls to the `LlmClient`.
    #[serde(default)]
    pub llm_circuit_breaker: CircuitBreakerConfig,
}

impl Default for ExecutionWorkerConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            temperature: default_execution_temperature(),
            model: default_execution_model(),
            cancellation_poll_ms: default_cancellation_poll_ms(),
            llm_circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}
