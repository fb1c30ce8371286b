//! The `Task` entity and its closed classification enums.
//!
//! Per `spec.md` §9 ("Dynamic dispatch on task type"), the set of task types
//! is deliberately small and closed — a tagged enum, not open polymorphism.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{Nid, TaskId};

/// The kind of work a task performs. Drives worker-type routing (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Planning,
    Composition,
    Reasoning,
    Retrieval,
    Reflection,
    Aggregation,
}

impl TaskType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "PLANNING",
            Self::Composition => "COMPOSITION",
            Self::Reasoning => "REASONING",
            Self::Retrieval => "RETRIEVAL",
            Self::Reflection => "REFLECTION",
            Self::Aggregation => "AGGREGATION",
        }
    }

    /// Parse from the wire-format string, used when decoding event payloads.
    pub fn parse(raw: &str) -> Result<Self, crate::errors::TaskerError> {
        match raw {
            "PLANNING" => Ok(Self::Planning),
            "COMPOSITION" => Ok(Self::Composition),
            "REASONING" => Ok(Self::Reasoning),
            "RETRIEVAL" => Ok(Self::Retrieval),
            "REFLECTION" => Ok(Self::Reflection),
            "AGGREGATION" => Ok(Self::Aggregation),
            other => Err(crate::errors::TaskerError::UnknownTaskType(
                other.to_string(),
            )),
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The lifecycle state of a task. Transitions are monotonic along one of two
/// terminal paths (`spec.md` §3 invariant 2):
/// `PendingDeps -> Ready -> Assigned -> Running -> Completed`, or any
/// non-terminal state `-> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    PendingDeps,
    Ready,
    Assigned,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingDeps => "PENDING_DEPS",
            Self::Ready => "READY",
            Self::Assigned => "ASSIGNED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is a legal transition from `self`, per invariant 2.
    #[must_use]
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (PendingDeps, Ready)
                | (Ready, Assigned)
                | (Assigned, Running)
                | (Running, Completed)
                // Idempotent re-assignment / re-observation of the same state
                // (TaskAssigned handler is "optional... for observability").
                | (Assigned, Assigned)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of work in the plan tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub root_task_id: TaskId,
    pub parent_task_id: Option<TaskId>,
    pub nid: Nid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Optional free-form status detail for observability (not part of the
    /// closed lifecycle).
    pub detailed_status: Option<String>,
    pub dependencies: BTreeSet<TaskId>,
    pub dependents: BTreeSet<TaskId>,
    pub goal: String,
    pub metadata: Value,
    pub input_data: Value,
    pub result: Option<Value>,
    pub error_info: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Construct a fresh task. Callers set `dependencies`; `dependents` is
    /// always populated by the State Service as sibling tasks reference it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: TaskId,
        root_task_id: TaskId,
        parent_task_id: Option<TaskId>,
        nid: Nid,
        task_type: TaskType,
        goal: impl Into<String>,
        metadata: Value,
        dependencies: BTreeSet<TaskId>,
    ) -> Self {
        let now = Utc::now();
        let status = if dependencies.is_empty() {
            TaskStatus::Ready
        } else {
            TaskStatus::PendingDeps
        };
        Self {
            task_id,
            root_task_id,
            parent_task_id,
            nid,
            task_type,
            status,
            detailed_status: None,
            dependencies,
            dependents: BTreeSet::new(),
            goal: goal.into(),
            metadata,
            input_data: Value::Null,
            result: None,
            error_info: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_task_id.is_none()
    }
}

/// A subtask as carried in the `SubtasksPlanned` event payload, using local
/// ids scoped to the plan rather than global `TaskId`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskDefinition {
    pub id: String,
    pub goal: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// When true, the subtask becomes a leaf EXECUTE task rather than a
    /// nested PLAN.
    #[serde(default)]
    pub atom: bool,
}
