//! The Task Store: an arena of tasks keyed by id, owned exclusively by the
//! State Service (`spec.md` §9 "Recursive / cyclic graphs" — never hold
//! pointers between tasks, always dereference through the arena under the
//! store's lock).

use std::collections::HashMap;

use tasker_shared::ids::TaskId;
use tasker_shared::task::Task;
use tokio::sync::Mutex;

/// Process-wide mutable state for one State Service instance. All mutation
/// goes through [`TaskStore::transaction`], so readiness checks that must
/// "complete without yielding to other writers on the same run" (`spec.md`
/// §5) hold the lock for their whole read-then-write.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: Mutex<HashMap<TaskId, Task>>,
}

impl TaskStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the whole arena. The closure is the
    /// store's only mutation surface; callers never hold a `Task` reference
    /// across an await point.
    pub async fn transaction<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut HashMap<TaskId, Task>) -> R,
    {
        let mut guard = self.tasks.lock().await;
        f(&mut guard)
    }

    pub async fn get(&self, task_id: TaskId) -> Option<Task> {
        self.tasks.lock().await.get(&task_id).cloned()
    }

    /// All tasks sharing `root_task_id`, ordered ascending by `task_id` for
    /// deterministic traces (`spec.md` §4.3 "Tie-breaking & ordering").
    pub async fn get_by_root(&self, root_task_id: TaskId) -> Vec<Task> {
        let guard = self.tasks.lock().await;
        let mut tasks: Vec<Task> = guard
            .values()
            .filter(|t| t.root_task_id == root_task_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.task_id);
        tasks
    }

    /// A full copy of the arena, used by tests asserting replay determinism
    /// (`spec.md` §8 "Round-trip laws").
    pub async fn snapshot(&self) -> HashMap<TaskId, Task> {
        self.tasks.lock().await.clone()
    }

    /// Drop every task. Used before replaying a run's event log into a fresh
    /// store (`spec.md` S6).
    pub async fn clear(&self) {
        self.tasks.lock().await.clear();
    }
}
