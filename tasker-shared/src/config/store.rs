//! Event Store configuration (`spec.md` §4.2).

use serde::{Deserialize, Serialize};

fn default_database_url() -> String {
    "postgres://localhost/tasker_core".to_string()
}

fn default_max_connections() -> u32 {
    10
}

/// Configuration for the durable Event Store.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Whether to materialize the optional `node_status_history` and
    /// `node_execution_timeline` views (`spec.md` §4.2).
    #[serde(default = "default_true")]
    pub enable_views: bool,
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            enable_views: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.max_connections, 10);
        assert!(config.enable_views);
    }
}
