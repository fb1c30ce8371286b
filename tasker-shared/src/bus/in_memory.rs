//! Single-process Event Bus backend. Used for tests, demos, and any
//! deployment that doesn't need cross-process fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::{TaskerError, TaskerResult};
use crate::events::Event;

use super::{Delivery, TaskerEventBus};

#[derive(Debug, Default)]
struct TopicState {
    /// Append-only log, in publish order (FIFO ordering per producer per
    /// topic, `spec.md` §4.1).
    log: Vec<Event>,
    /// Per-consumer-group queue of log indices still owed to that group.
    pending: HashMap<String, Vec<usize>>,
    /// In-flight deliveries for a group, keyed by delivery tag (the log
    /// index as a string), so a NACK can requeue them.
    in_flight: HashMap<String, HashMap<String, usize>>,
}

impl TopicState {
    fn group_pending(&mut self, group: &str) -> &mut Vec<usize> {
        self.pending.entry(group.to_string()).or_default()
    }

    fn group_in_flight(&mut self, group: &str) -> &mut HashMap<String, usize> {
        self.in_flight.entry(group.to_string()).or_default()
    }
}

/// A shared, in-process bus. Cheap to clone (all state is behind an `Arc`).
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventBus {
    topics: Arc<Mutex<HashMap<String, TopicState>>>,
}

impl InMemoryEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskerEventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, event: &Event) -> TaskerResult<()> {
        let mut topics = self.topics.lock().await;
        let state = topics.entry(topic.to_string()).or_default();
        let index = state.log.len();
        state.log.push(event.clone());
        for pending in state.pending.values_mut() {
            pending.push(index);
        }
        Ok(())
    }

    async fn receive(
        &self,
        topic: &str,
        consumer_group: &str,
        _consumer_id: &str,
        types: &[&str],
        max_messages: usize,
    ) -> TaskerResult<Vec<Delivery>> {
        let mut topics = self.topics.lock().await;
        let state = topics.entry(topic.to_string()).or_default();

        // A group seen for the first time catches up on everything already
        // published to the topic, then follows new entries as `publish`
        // appends them to every group's pending queue.
        if !state.pending.contains_key(consumer_group) {
            let backlog = (0..state.log.len()).collect();
            state.pending.insert(consumer_group.to_string(), backlog);
        }

        let pending_indices = std::mem::take(state.group_pending(consumer_group));
        let mut taken = Vec::new();
        let mut remaining = Vec::new();
        for index in pending_indices {
            if taken.len() >= max_messages {
                remaining.push(index);
                continue;
            }
            let matches = types.is_empty() || {
                let event_type = state.log[index].event_type();
                types.contains(&event_type)
            };
            if matches {
                taken.push(index);
            } else {
                remaining.push(index);
            }
        }
        *state.group_pending(consumer_group) = remaining;

        let mut deliveries = Vec::with_capacity(taken.len());
        for index in taken {
            let tag = index.to_string();
            state
                .group_in_flight(consumer_group)
                .insert(tag.clone(), index);
            deliveries.push(Delivery {
                delivery_tag: tag,
                event: state.log[index].clone(),
            });
        }
        Ok(deliveries)
    }

    async fn ack(
        &self,
        topic: &str,
        consumer_group: &str,
        delivery: &Delivery,
    ) -> TaskerResult<()> {
        let mut topics = self.topics.lock().await;
        if let Some(state) = topics.get_mut(topic) {
            state
                .group_in_flight(consumer_group)
                .remove(&delivery.delivery_tag);
        }
        Ok(())
    }

    async fn nack(
        &self,
        topic: &str,
        consumer_group: &str,
        delivery: &Delivery,
    ) -> TaskerResult<()> {
        let mut topics = self.topics.lock().await;
        let state = topics
            .get_mut(topic)
            .ok_or_else(|| TaskerError::TransportUnavailable(format!("unknown topic {topic}")))?;
        if let Some(index) = state.group_in_flight(consumer_group).remove(&delivery.delivery_tag) {
            state.group_pending(consumer_group).push(index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventPayload, RunFinished};
    use crate::ids::{RunId, TaskId};

    fn sample_event() -> Event {
        Event::new(
            RunId::from(TaskId::new()),
            EventPayload::RunFinished(RunFinished {
                total_steps: 1,
                total_nodes: 1,
            }),
        )
    }

    #[tokio::test]
    async fn test_publish_then_receive() {
        let bus = InMemoryEventBus::new();
        let event = sample_event();
        bus.publish("tasks", &event).await.unwrap();

        let deliveries = bus.receive("tasks", "group-a", "c1", &[], 10).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].event.event_id, event.event_id);
    }

    #[tokio::test]
    async fn test_two_groups_each_get_a_copy() {
        let bus = InMemoryEventBus::new();
        bus.publish("tasks", &sample_event()).await.unwrap();

        let a = bus.receive("tasks", "group-a", "c1", &[], 10).await.unwrap();
        let b = bus.receive("tasks", "group-b", "c1", &[], 10).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn test_nack_requeues_for_redelivery() {
        let bus = InMemoryEventBus::new();
        bus.publish("tasks", &sample_event()).await.unwrap();

        let first = bus.receive("tasks", "group-a", "c1", &[], 10).await.unwrap();
        assert_eq!(first.len(), 1);
        bus.nack("tasks", "group-a", &first[0]).await.unwrap();

        let redelivered = bus.receive("tasks", "group-a", "c1", &[], 10).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].event.event_id, first[0].event.event_id);
    }

    #[tokio::test]
    async fn test_ack_does_not_requeue() {
        let bus = InMemoryEventBus::new();
        bus.publish("tasks", &sample_event()).await.unwrap();

        let first = bus.receive("tasks", "group-a", "c1", &[], 10).await.unwrap();
        bus.ack("tasks", "group-a", &first[0]).await.unwrap();

        let again = bus.receive("tasks", "group-a", "c1", &[], 10).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_type_filtering() {
        let bus = InMemoryEventBus::new();
        bus.publish("tasks", &sample_event()).await.unwrap();

        let filtered = bus
            .receive("tasks", "group-a", "c1", &["task_ready"], 10)
            .await
            .unwrap();
        assert!(filtered.is_empty());

        let matched = bus
            .receive("tasks", "group-a", "c1", &["run_finished"], 10)
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
    }

    #[tokio::test]
    async fn test_fifo_ordering_per_topic() {
        let bus = InMemoryEventBus::new();
        let e1 = sample_event();
        let e2 = sample_event();
        bus.publish("tasks", &e1).await.unwrap();
        bus.publish("tasks", &e2).await.unwrap();

        let deliveries = bus.receive("tasks", "group-a", "c1", &[], 10).await.unwrap();
        assert_eq!(deliveries[0].event.event_id, e1.event_id);
        assert_eq!(deliveries[1].event.event_id, e2.event_id);
    }
}
