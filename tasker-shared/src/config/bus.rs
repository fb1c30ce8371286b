//! Event Bus configuration (`spec.md` §4.1).

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_topic() -> String {
    "tasks".to_string()
}

fn default_events_log_topic() -> String {
    "events-log".to_string()
}

fn default_nack_resend_sleep_ms() -> u64 {
    1_000
}

fn default_ack_wait_ms() -> u64 {
    30_000
}

fn default_consumer_concurrency() -> usize {
    8
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

/// Configuration for the Event Bus transport (`spec.md` §4.1, §6 wire format).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventBusConfig {
    /// Which [`crate::bus::EventBusKind`] backend to construct.
    #[serde(default)]
    pub backend: BusBackend,
    /// Redis connection string, used when `backend = "redis"`.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// The single logical topic carrying state/scheduling events.
    #[serde(default = "default_topic")]
    pub tasks_topic: String,
    /// The firehose topic consumed by the Event Store and observers.
    #[serde(default = "default_events_log_topic")]
    pub events_log_topic: String,
    /// How long an unacknowledged message waits before redelivery.
    #[serde(default = "default_nack_resend_sleep_ms")]
    pub nack_resend_sleep_ms: u64,
    /// Handler ACK window before the bus considers a message stuck.
    #[serde(default = "default_ack_wait_ms")]
    pub ack_wait_ms: u64,
    /// Max concurrent handler invocations per subscription.
    #[serde(default = "default_consumer_concurrency")]
    pub consumer_concurrency: usize,
}

impl EventBusConfig {
    #[must_use]
    pub fn nack_resend_sleep(&self) -> Duration {
        Duration::from_millis(self.nack_resend_sleep_ms)
    }

    #[must_use]
    pub fn ack_wait(&self) -> Duration {
        Duration::from_millis(self.ack_wait_ms)
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::default(),
            redis_url: default_redis_url(),
            tasks_topic: default_topic(),
            events_log_topic: default_events_log_topic(),
            nack_resend_sleep_ms: default_nack_resend_sleep_ms(),
            ack_wait_ms: default_ack_wait_ms(),
            consumer_concurrency: default_consumer_concurrency(),
        }
    }
}

/// Which concrete bus implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusBackend {
    /// Single-process, used for tests and demos.
    #[default]
    InMemory,
    /// Redis Streams, per `spec.md` §6 wire format.
    Redis,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EventBusConfig::default();
        assert_eq!(config.backend, BusBackend::InMemory);
        assert_eq!(config.tasks_topic, "tasks");
        assert_eq!(config.nack_resend_sleep(), Duration::from_secs(1));
    }
}
