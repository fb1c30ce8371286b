//! Identity newtypes for the task graph.
//!
//! `TaskId` and `RunId` wrap `Uuid` so a task_id can never be passed where a
//! root_task_id is expected (and vice versa) without an explicit conversion —
//! the teacher's codebase reaches for `derive_more` newtypes in exactly this
//! situation.

use derive_more::{AsRef, Display, From};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a single task within a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From, AsRef,
)]
pub struct TaskId(pub Uuid);

impl TaskId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Deterministically derive a child task's id from its parent task id
    /// and its local id within the plan, so replaying the same
    /// `SubtasksPlanned` event twice (`spec.md` §8 S6) assigns the same
    /// global ids both times instead of generating fresh random ones.
    #[must_use]
    pub fn derived(parent_task_id: TaskId, local_id: &str) -> Self {
        Self(Uuid::new_v5(
            &parent_task_id.0,
            local_id.as_bytes(),
        ))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifies a run (the root task's id, used for event correlation).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From, AsRef,
)]
pub struct RunId(pub Uuid);

impl From<TaskId> for RunId {
    fn from(id: TaskId) -> Self {
        Self(id.0)
    }
}

impl RunId {
    #[must_use]
    pub fn as_task_id(&self) -> TaskId {
        TaskId(self.0)
    }
}

/// A hierarchical dotted identifier reflecting a task's position in its
/// parent's plan, e.g. `"1.2.3"`. Unique within a `root_task_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub struct Nid(String);

impl Nid {
    /// Build the root nid, `"1"`.
    #[must_use]
    pub fn root() -> Self {
        Self("1".to_string())
    }

    /// Build a child nid from a parent nid and a 1-based local index.
    #[must_use]
    pub fn child(parent: &Nid, local_index: usize) -> Self {
        Self(format!("{}.{}", parent.0, local_index))
    }

    /// Parse a dotted nid string, validating every segment is a positive
    /// integer.
    pub fn parse(raw: impl Into<String>) -> Result<Self, String> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err("nid must not be empty".to_string());
        }
        for segment in raw.split('.') {
            if segment.is_empty() || segment.parse::<u32>().is_err() {
                return Err(format!("invalid nid segment: {segment:?} in {raw:?}"));
            }
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.split('.').count()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
