//! Scheduler configuration (`spec.md` §4.4): the `task_type -> worker_type`
//! routing table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::task::TaskType;

fn default_consumer_group() -> String {
    "scheduler".to_string()
}

/// Configuration for the Scheduler, including the routing table. The
/// `spec.md` §9 open question ("RETRIEVAL routing is configurable") is
/// resolved by making the whole table configurable rather than hardcoded.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    #[serde(default = "default_routing_table")]
    pub routing_table: HashMap<TaskType, String>,
}

fn default_routing_table() -> HashMap<TaskType, String> {
    use TaskType::*;
    HashMap::from([
        (Planning, "planning-worker".to_string()),
        (Composition, "execution-worker".to_string()),
        (Reasoning, "execution-worker".to_string()),
        (Reflection, "reflection-worker".to_string()),
        (Aggregation, "aggregation-worker".to_string()),
        (Retrieval, "retrieval-worker".to_string()),
    ])
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            consumer_group: default_consumer_group(),
            routing_table: default_routing_table(),
        }
    }
}

impl SchedulerConfig {
    /// Look up the worker type for a task type, falling back to
    /// `execution-worker` for RETRIEVAL if no specialized pool is
    /// configured (`spec.md` §4.4).
    #[must_use]
    pub fn worker_type_for(&self, task_type: TaskType) -> Option<&str> {
        self.routing_table
            .get(&task_type)
            .map(String::as_str)
            .or(if task_type == TaskType::Retrieval {
                Some("execution-worker")
            } else {
                None
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_routing_table() {
        let config = SchedulerConfig::default();
        assert_eq!(
            config.worker_type_for(TaskType::Planning),
            Some("planning-worker")
        );
        assert_eq!(
            config.worker_type_for(TaskType::Composition),
            Some("execution-worker")
        );
        assert_eq!(
            config.worker_type_for(TaskType::Reasoning),
            Some("execution-worker")
        );
    }

    #[test]
    fn test_retrieval_falls_back_to_execution_worker() {
        let mut config = SchedulerConfig::default();
        config.routing_table.remove(&TaskType::Retrieval);
        assert_eq!(
            config.worker_type_for(TaskType::Retrieval),
            Some("execution-worker")
        );
    }
}
