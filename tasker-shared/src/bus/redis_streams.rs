//! Redis Streams Event Bus backend.
//!
//! Wire format per `spec.md` §6: each stream entry carries a single field,
//! `json_payload`, holding the JSON-encoded [`Event`]. Consumer groups map
//! directly onto Redis Streams consumer groups (`XGROUP`/`XREADGROUP`/`XACK`).

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::errors::{TaskerError, TaskerResult};
use crate::events::{Event, RedisStreamEnvelope};

use super::{Delivery, TaskerEventBus};

/// A bus backed by Redis Streams.
#[derive(Clone)]
pub struct RedisStreamsEventBus {
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisStreamsEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsEventBus").finish_non_exhaustive()
    }
}

impl RedisStreamsEventBus {
    /// Connect to `redis_url`, e.g. `redis://127.0.0.1:6379`.
    pub async fn connect(redis_url: &str) -> TaskerResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| TaskerError::TransportUnavailable(e.to_string()))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| TaskerError::TransportUnavailable(e.to_string()))?;
        Ok(Self { connection })
    }

    /// Ensure the consumer group exists on `topic`, creating the stream if
    /// necessary. Idempotent: `BUSYGROUP` is swallowed.
    async fn ensure_group(&self, topic: &str, group: &str) -> TaskerResult<()> {
        let mut conn = self.connection.clone();
        let result: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(topic, group, "0")
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(TaskerError::TransportUnavailable(e.to_string())),
        }
    }
}

#[async_trait]
impl TaskerEventBus for RedisStreamsEventBus {
    async fn publish(&self, topic: &str, event: &Event) -> TaskerResult<()> {
        let envelope = RedisStreamEnvelope::encode(event)?;
        let mut conn = self.connection.clone();
        let _: String = conn
            .xadd(topic, "*", &[("json_payload", envelope.json_payload)])
            .await
            .map_err(|e| TaskerError::TransportUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn receive(
        &self,
        topic: &str,
        consumer_group: &str,
        consumer_id: &str,
        types: &[&str],
        max_messages: usize,
    ) -> TaskerResult<Vec<Delivery>> {
        self.ensure_group(topic, consumer_group).await?;
        let mut conn = self.connection.clone();

        let opts = redis::streams::StreamReadOptions::default()
            .group(consumer_group, consumer_id)
            .count(max_messages);
        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[topic], &[">"], &opts)
            .await
            .map_err(|e| TaskerError::TransportUnavailable(e.to_string()))?;

        let mut deliveries = Vec::new();
        for stream_key in reply.keys {
            for stream_id in stream_key.ids {
                let json_payload: String = stream_id
                    .map
                    .get("json_payload")
                    .and_then(|v| redis::from_redis_value::<String>(v.clone()).ok())
                    .ok_or_else(|| {
                        TaskerError::StoreError(format!(
                            "stream entry {} missing json_payload field",
                            stream_id.id
                        ))
                    })?;
                let event: Event = serde_json::from_str(&json_payload)?;
                if !types.is_empty() && !types.contains(&event.event_type()) {
                    // Not for this subscription's declared type set; ack it
                    // immediately so it doesn't block the group, since Redis
                    // Streams has no server-side type filtering.
                    let _: i64 = conn
                        .xack(topic, consumer_group, &[stream_id.id.clone()])
                        .await
                        .map_err(|e| TaskerError::TransportUnavailable(e.to_string()))?;
                    continue;
                }
                deliveries.push(Delivery {
                    delivery_tag: stream_id.id,
                    event,
                });
            }
        }
        Ok(deliveries)
    }

    async fn ack(
        &self,
        topic: &str,
        consumer_group: &str,
        delivery: &Delivery,
    ) -> TaskerResult<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .xack(topic, consumer_group, &[delivery.delivery_tag.clone()])
            .await
            .map_err(|e| TaskerError::TransportUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn nack(
        &self,
        _topic: &str,
        _consumer_group: &str,
        _delivery: &Delivery,
    ) -> TaskerResult<()> {
        // Redis Streams redelivers unacknowledged entries via the pending
        // entries list; no explicit NACK call is needed. A future claim-based
        // reaper (XCLAIM/XAUTOCLAIM) can be layered on for stuck consumers.
        Ok(())
    }
}
