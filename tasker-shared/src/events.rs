//! The closed event catalog and envelope (`spec.md` §6).
//!
//! Every event carries a common header plus a type-specific payload. The
//! catalog is a single tagged enum rather than open payload types, matching
//! the engine's "closed tagged variant" design note (`spec.md` §9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ids::{RunId, TaskId};
use crate::task::{SubtaskDefinition, TaskType};

/// An envelope wrapping a typed payload with the header fields common to
/// every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    #[must_use]
    pub fn new(run_id: RunId, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            run_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// The wire `event_type` string, used for bus-level type filtering.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

/// The closed catalog of event payloads. Tagged by `event_type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    RunStarted(RunStarted),
    RunFinished(RunFinished),
    RunError(RunError),

    TaskSubmitted(TaskSubmitted),
    TaskReady(TaskReady),
    TaskAssigned(TaskAssigned),
    TaskStarted(TaskStarted),
    TaskCompleted(TaskCompleted),
    TaskFailed(TaskFailed),
    SubtasksPlanned(SubtasksPlanned),

    StepStarted(StepStarted),
    StepFinished(StepFinished),

    NodeStatusChanged(NodeStatusChanged),
    NodeCreated(NodeCreated),
    NodeAdded(NodeAdded),
    EdgeAdded(EdgeAdded),
    PlanReceived(PlanReceived),
    InnerGraphBuilt(InnerGraphBuilt),
    NodeResultAvailable(NodeResultAvailable),

    LlmCallStarted(LlmCallStarted),
    LlmCallCompleted(LlmCallCompleted),
    ToolInvoked(ToolInvoked),
    ToolReturned(ToolReturned),
}

impl EventPayload {
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted(_) => "run_started",
            Self::RunFinished(_) => "run_finished",
            Self::RunError(_) => "run_error",
            Self::TaskSubmitted(_) => "task_submitted",
            Self::TaskReady(_) => "task_ready",
            Self::TaskAssigned(_) => "task_assigned",
            Self::TaskStarted(_) => "task_started",
            Self::TaskCompleted(_) => "task_completed",
            Self::TaskFailed(_) => "task_failed",
            Self::SubtasksPlanned(_) => "subtasks_planned",
            Self::StepStarted(_) => "step_started",
            Self::StepFinished(_) => "step_finished",
            Self::NodeStatusChanged(_) => "node_status_changed",
            Self::NodeCreated(_) => "node_created",
            Self::NodeAdded(_) => "node_added",
            Self::EdgeAdded(_) => "edge_added",
            Self::PlanReceived(_) => "plan_received",
            Self::InnerGraphBuilt(_) => "inner_graph_built",
            Self::NodeResultAvailable(_) => "node_result_available",
            Self::LlmCallStarted(_) => "llm_call_started",
            Self::LlmCallCompleted(_) => "llm_call_completed",
            Self::ToolInvoked(_) => "tool_invoked",
            Self::ToolReturned(_) => "tool_returned",
        }
    }

    /// The `task_id` this event concerns, if any — used by the State
    /// Service's per-task idempotency guards.
    #[must_use]
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::TaskSubmitted(p) => Some(p.task_id),
            Self::TaskReady(p) => Some(p.task_id),
            Self::TaskAssigned(p) => Some(p.task_id),
            Self::TaskStarted(p) => Some(p.task_id),
            Self::TaskCompleted(p) => Some(p.task_id),
            Self::TaskFailed(p) => Some(p.task_id),
            Self::SubtasksPlanned(p) => Some(p.parent_task_id),
            _ => None,
        }
    }

    /// The `node_id` this event concerns, for graph-structure events that
    /// carry one but have no `task_id` field of their own — used to
    /// populate `events.node_id` so `idx_events_node_id` and the
    /// node-scoped views can find them.
    #[must_use]
    pub fn node_id(&self) -> Option<TaskId> {
        match self {
            Self::NodeCreated(p) => Some(p.node_id),
            Self::NodeStatusChanged(p) => Some(p.node_id),
            Self::NodeResultAvailable(p) => Some(p.node_id),
            Self::NodeAdded(p) => Some(p.node_id),
            Self::StepStarted(p) => Some(p.node_id),
            Self::StepFinished(p) => Some(p.node_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStarted {
    pub input_data: Value,
    pub config: Value,
    pub run_mode: String,
    pub timestamp_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFinished {
    pub total_steps: u64,
    pub total_nodes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub error_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmitted {
    pub task_id: TaskId,
    pub root_task_id: TaskId,
    pub goal: String,
    pub task_type: TaskType,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReady {
    pub task_id: TaskId,
    pub root_task_id: TaskId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssigned {
    pub task_id: TaskId,
    pub root_task_id: TaskId,
    pub worker_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStarted {
    pub task_id: TaskId,
    pub root_task_id: TaskId,
    pub worker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompleted {
    pub task_id: TaskId,
    pub root_task_id: TaskId,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailed {
    pub task_id: TaskId,
    pub root_task_id: TaskId,
    pub error_info: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtasksPlanned {
    pub parent_task_id: TaskId,
    pub subtasks: Vec<SubtaskDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStarted {
    pub step: u32,
    pub node_id: TaskId,
    pub node_goal: String,
    pub task_type: TaskType,
    pub root_id: TaskId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFinished {
    pub step: u32,
    pub node_id: TaskId,
    pub action_name: Option<String>,
    pub status_after: String,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatusChanged {
    pub node_id: TaskId,
    pub old_status: String,
    pub new_status: String,
    pub step: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCreated {
    pub node_id: TaskId,
    pub node_nid: String,
    pub node_type: String,
    pub task_type: TaskType,
    pub task_goal: String,
    pub layer: u32,
    #[serde(default)]
    pub outer_node_id: Option<TaskId>,
    pub root_node_id: TaskId,
    #[serde(default)]
    pub initial_parent_nids: Vec<String>,
    #[serde(default)]
    pub step: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAdded {
    pub node_id: TaskId,
    pub node_nid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeAdded {
    pub parent_node_id: TaskId,
    pub child_node_id: TaskId,
    pub parent_nid: String,
    pub child_nid: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanReceived {
    pub node_id: TaskId,
    pub raw_plan: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InnerGraphBuilt {
    pub node_id: TaskId,
    pub node_ids: Vec<TaskId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResultAvailable {
    pub node_id: TaskId,
    pub result_summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallStarted {
    pub call_id: Uuid,
    pub agent_class: String,
    pub model: String,
    pub prompt_summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallCompleted {
    pub call_id: Uuid,
    pub agent_class: String,
    pub model: String,
    pub response_summary: String,
    pub duration_seconds: f64,
    pub usage: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvoked {
    pub tool_call_id: Uuid,
    pub tool_name: String,
    #[serde(default)]
    pub api_name: Option<String>,
    pub args_summary: String,
    #[serde(default)]
    pub node_id: Option<TaskId>,
    #[serde(default)]
    pub step: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolReturned {
    pub tool_call_id: Uuid,
    pub tool_name: String,
    pub result_summary: String,
    pub state: String,
    pub duration_seconds: f64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub node_id: Option<TaskId>,
    #[serde(default)]
    pub step: Option<u32>,
}

/// Wire wrapper used when publishing onto Redis Streams (`spec.md` §6): the
/// stream entry carries one field, `json_payload`, containing the
/// JSON-encoded [`Event`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisStreamEnvelope {
    pub json_payload: String,
}

impl RedisStreamEnvelope {
    pub fn encode(event: &Event) -> Result<Self, crate::errors::TaskerError> {
        Ok(Self {
            json_payload: serde_json::to_string(event)?,
        })
    }

    pub fn decode(&self) -> Result<Event, crate::errors::TaskerError> {
        Ok(serde_json::from_str(&self.json_payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_strings() {
        let run_id = RunId::from(TaskId::new());
        let event = Event::new(
            run_id,
            EventPayload::TaskReady(TaskReady {
                task_id: TaskId::new(),
                root_task_id: run_id.as_task_id(),
            }),
        );
        assert_eq!(event.event_type(), "task_ready");
    }

    #[test]
    fn test_task_id_extraction() {
        let task_id = TaskId::new();
        let run_id = RunId::from(task_id);
        let event = Event::new(
            run_id,
            EventPayload::TaskCompleted(TaskCompleted {
                task_id,
                root_task_id: run_id.as_task_id(),
                result: Value::Null,
            }),
        );
        assert_eq!(event.payload.task_id(), Some(task_id));
    }

    #[test]
    fn test_events_without_task_id() {
        let run_id = RunId::from(TaskId::new());
        let event = Event::new(
            run_id,
            EventPayload::RunFinished(RunFinished {
                total_steps: 3,
                total_nodes: 2,
            }),
        );
        assert_eq!(event.payload.task_id(), None);
    }

    #[test]
    fn test_redis_envelope_roundtrip() {
        let run_id = RunId::from(TaskId::new());
        let event = Event::new(
            run_id,
            EventPayload::RunFinished(RunFinished {
                total_steps: 1,
                total_nodes: 1,
            }),
        );
        let envelope = RedisStreamEnvelope::encode(&event).unwrap();
        let decoded = envelope.decode().unwrap();
        assert_eq!(decoded.event_id, event.event_id);
        assert_eq!(decoded.event_type(), "run_finished");
    }

    #[test]
    fn test_json_roundtrip_preserves_tag() {
        let run_id = RunId::from(TaskId::new());
        let event = Event::new(
            run_id,
            EventPayload::TaskFailed(TaskFailed {
                task_id: TaskId::new(),
                root_task_id: run_id.as_task_id(),
                error_info: "upstream failure".to_string(),
            }),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"task_failed\""));
        let decoded: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.event_type(), "task_failed");
    }
}
