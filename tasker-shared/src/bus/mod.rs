//! # Event Bus (C1)
//!
//! Ordered publish/subscribe with at-least-once delivery, consumer groups,
//! and replayable log (`spec.md` §4.1). [`TaskerEventBus`] is the contract;
//! [`EventBusKind`] is an enum-dispatch wrapper over the concrete
//! implementations, matching the teacher's `MessageRouterKind` /
//! `MessagingProvider` convention of enum dispatch over `dyn Trait`.

mod in_memory;
#[cfg(feature = "redis-bus")]
mod redis_streams;

pub use in_memory::InMemoryEventBus;
#[cfg(feature = "redis-bus")]
pub use redis_streams::RedisStreamsEventBus;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::TaskerResult;
use crate::events::Event;

/// A single delivered message, opaque beyond its payload and the tag needed
/// to ack/nack it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: String,
    pub event: Event,
}

/// The outcome a subscription handler returns for a delivered message
/// (`spec.md` §4.1: "handler returns ACK / NACK / error").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Nack,
}

/// Topic-scoped publish/subscribe contract (`spec.md` §4.1).
#[async_trait]
pub trait TaskerEventBus: Send + Sync {
    /// Publish `event` to `topic`. Fails with `TransportUnavailable` if the
    /// broker cannot durably accept the message.
    async fn publish(&self, topic: &str, event: &Event) -> TaskerResult<()>;

    /// Fetch up to `max_messages` undelivered-or-redelivered messages for
    /// `consumer_group` on `topic`, filtered to `types` (empty = all types).
    async fn receive(
        &self,
        topic: &str,
        consumer_group: &str,
        consumer_id: &str,
        types: &[&str],
        max_messages: usize,
    ) -> TaskerResult<Vec<Delivery>>;

    /// Acknowledge successful processing of a delivery.
    async fn ack(&self, topic: &str, consumer_group: &str, delivery: &Delivery) -> TaskerResult<()>;

    /// Negative-acknowledge a delivery; it becomes eligible for redelivery.
    async fn nack(&self, topic: &str, consumer_group: &str, delivery: &Delivery)
        -> TaskerResult<()>;
}

/// Enum-dispatch wrapper over the concrete bus backends, avoiding
/// `Arc<dyn TaskerEventBus>` vtable overhead in the common single-backend
/// case while keeping callers backend-agnostic.
#[derive(Debug, Clone)]
pub enum EventBusKind {
    InMemory(InMemoryEventBus),
    #[cfg(feature = "redis-bus")]
    Redis(RedisStreamsEventBus),
}

impl From<InMemoryEventBus> for EventBusKind {
    fn from(bus: InMemoryEventBus) -> Self {
        Self::InMemory(bus)
    }
}

#[cfg(feature = "redis-bus")]
impl From<RedisStreamsEventBus> for EventBusKind {
    fn from(bus: RedisStreamsEventBus) -> Self {
        Self::Redis(bus)
    }
}

#[async_trait]
impl TaskerEventBus for EventBusKind {
    async fn publish(&self, topic: &str, event: &Event) -> TaskerResult<()> {
        match self {
            Self::InMemory(bus) => bus.publish(topic, event).await,
            #[cfg(feature = "redis-bus")]
            Self::Redis(bus) => bus.publish(topic, event).await,
        }
    }

    async fn receive(
        &self,
        topic: &str,
        consumer_group: &str,
        consumer_id: &str,
        types: &[&str],
        max_messages: usize,
    ) -> TaskerResult<Vec<Delivery>> {
        match self {
            Self::InMemory(bus) => {
                bus.receive(topic, consumer_group, consumer_id, types, max_messages)
                    .await
            }
            #[cfg(feature = "redis-bus")]
            Self::Redis(bus) => {
                bus.receive(topic, consumer_group, consumer_id, types, max_messages)
                    .await
            }
        }
    }

    async fn ack(&self, topic: &str, consumer_group: &str, delivery: &Delivery) -> TaskerResult<()> {
        match self {
            Self::InMemory(bus) => bus.ack(topic, consumer_group, delivery).await,
            #[cfg(feature = "redis-bus")]
            Self::Redis(bus) => bus.ack(topic, consumer_group, delivery).await,
        }
    }

    async fn nack(
        &self,
        topic: &str,
        consumer_group: &str,
        delivery: &Delivery,
    ) -> TaskerResult<()> {
        match self {
            Self::InMemory(bus) => bus.nack(topic, consumer_group, delivery).await,
            #[cfg(feature = "redis-bus")]
            Self::Redis(bus) => bus.nack(topic, consumer_group, delivery).await,
        }
    }
}

/// Publish `event` onto both the control-plane `tasks` topic and the
/// broadcast `events-log` topic (`spec.md` §4.1: "a separate events-log
/// topic is used for the broadcast/persistence firehose"). Every component
/// publishes through this so the Event Store's firehose stays complete
/// without each call site having to remember both topics.
pub async fn publish_everywhere(
    bus: &EventBusKind,
    tasks_topic: &str,
    events_log_topic: &str,
    event: &Event,
) -> TaskerResult<()> {
    bus.publish(tasks_topic, event).await?;
    if events_log_topic != tasks_topic {
        bus.publish(events_log_topic, event).await?;
    }
    Ok(())
}

/// Run a long-lived delivery loop against `bus`, invoking `handler` for each
/// delivered event and ack/nack-ing per its returned [`AckDecision`]. Errors
/// returned by the handler are treated as NACK (`spec.md` §4.1). Exits when
/// `cancellation` is triggered.
pub async fn subscribe_loop<F, Fut>(
    bus: &EventBusKind,
    topic: &str,
    consumer_group: &str,
    consumer_id: &str,
    types: &[&str],
    nack_resend_sleep: Duration,
    cancellation: CancellationToken,
    handler: F,
) where
    F: Fn(Event) -> Fut,
    Fut: Future<Output = TaskerResult<AckDecision>>,
{
    loop {
        if cancellation.is_cancelled() {
            return;
        }

        let deliveries = tokio::select! {
            result = bus.receive(topic, consumer_group, consumer_id, types, 16) => result,
            _ = cancellation.cancelled() => return,
        };

        let deliveries = match deliveries {
            Ok(deliveries) => deliveries,
            Err(error) => {
                tracing::warn!(%error, topic, consumer_group, "bus receive failed");
                tokio::time::sleep(nack_resend_sleep).await;
                continue;
            }
        };

        if deliveries.is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
            continue;
        }

        for delivery in deliveries {
            let decision = match handler(delivery.event.clone()).await {
                Ok(decision) => decision,
                Err(error) => {
                    tracing::warn!(%error, topic, consumer_group, "handler error, treating as NACK");
                    AckDecision::Nack
                }
            };

            let ack_result = match decision {
                AckDecision::Ack => bus.ack(topic, consumer_group, &delivery).await,
                AckDecision::Nack => {
                    tokio::time::sleep(nack_resend_sleep).await;
                    bus.nack(topic, consumer_group, &delivery).await
                }
            };

            if let Err(error) = ack_result {
                tracing::warn!(%error, topic, consumer_group, "failed to ack/nack delivery");
            }
        }
    }
}
