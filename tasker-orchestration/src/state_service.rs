//! The State Service (`spec.md` §4.3): the sole writer of task state.
//! Subscribes to the task lifecycle events and maintains the [`TaskStore`],
//! publishing `TaskReady` as dependencies resolve.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::Instant;

use serde_json::Value;
use tasker_shared::bus::{publish_everywhere, EventBusKind};
use tasker_shared::config::CircuitBreakerConfig;
use tasker_shared::errors::{TaskerError, TaskerResult};
use tasker_shared::events::{
    EdgeAdded, Event, EventPayload, NodeCreated, NodeResultAvailable, NodeStatusChanged,
    RunError, RunFinished, RunStarted, StepStarted, SubtasksPlanned, TaskAssigned, TaskCompleted,
    TaskFailed, TaskReady, TaskStarted, TaskSubmitted,
};
use tasker_shared::ids::{Nid, RunId, TaskId};
use tasker_shared::resilience::{CircuitBreaker, CircuitBreakerBehavior};
use tasker_shared::task::{SubtaskDefinition, Task, TaskStatus, TaskType};
use tracing::warn;

use crate::stats::{ProcessingStats, ProcessingStatsSnapshot};
use crate::task_store::TaskStore;

/// Owns the arena and the publish side of every task lifecycle transition.
/// Cheap to clone; the arena itself lives behind an `Arc`.
#[derive(Debug, Clone)]
pub struct StateService {
    store: Arc<TaskStore>,
    bus: EventBusKind,
    tasks_topic: String,
    events_log_topic: String,
    event_store: Option<Arc<tasker_store::EventStore>>,
    bus_circuit_breaker: Arc<CircuitBreaker>,
    store_circuit_breaker: Arc<CircuitBreaker>,
    stats: Arc<ProcessingStats>,
    /// `step_started` events seen per root task, drained into `RunFinished`'s
    /// `total_steps` (`spec.md` §6 catalog — distinct from `total_nodes`).
    step_counts: Arc<SyncMutex<HashMap<TaskId, u64>>>,
    /// Set for the duration of [`Self::rehydrate_from_store`]: suppresses
    /// `publish` so folding the log back through `handle_event` only rebuilds
    /// the in-memory arena, instead of re-appending the replayed derived
    /// events to the store and re-broadcasting them to the live bus (which
    /// would make the Scheduler and Workers redo the original run's work).
    replaying: Arc<AtomicBool>,
}

impl StateService {
    #[must_use]
    pub fn new(
        bus: EventBusKind,
        tasks_topic: impl Into<String>,
        events_log_topic: impl Into<String>,
    ) -> Self {
        Self {
            store: Arc::new(TaskStore::new()),
            bus,
            tasks_topic: tasks_topic.into(),
            events_log_topic: events_log_topic.into(),
            event_store: None,
            bus_circuit_breaker: Arc::new(CircuitBreaker::new(
                "state-service-bus",
                CircuitBreakerConfig::default().to_resilience_config(),
            )),
            store_circuit_breaker: Arc::new(CircuitBreaker::new(
                "state-service-store",
                CircuitBreakerConfig::default().to_resilience_config(),
            )),
            stats: Arc::new(ProcessingStats::default()),
            step_counts: Arc::new(SyncMutex::new(HashMap::new())),
            replaying: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attaches a durable Event Store so every published event is also
    /// appended to the log, and configures the circuit breakers guarding the
    /// bus-publish and store-write boundaries (`spec.md` §7). A store write
    /// failure is logged and does not fail the publish: the bus is the
    /// control-plane source of truth for a live run, the store is a
    /// best-effort durability layer for replay/rehydration.
    #[must_use]
    pub fn with_store(
        mut self,
        event_store: Arc<tasker_store::EventStore>,
        bus_breaker: CircuitBreakerConfig,
        store_breaker: CircuitBreakerConfig,
    ) -> Self {
        self.event_store = Some(event_store);
        self.bus_circuit_breaker =
            Arc::new(CircuitBreaker::new("state-service-bus", bus_breaker.to_resilience_config()));
        self.store_circuit_breaker = Arc::new(CircuitBreaker::new(
            "state-service-store",
            store_breaker.to_resilience_config(),
        ));
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// The bus-publish and store-write circuit breakers, for health
    /// reporting (`spec.md` §6 supplemented feature: circuit breakers).
    #[must_use]
    pub fn circuit_breakers(&self) -> [&dyn CircuitBreakerBehavior; 2] {
        [self.bus_circuit_breaker.as_ref(), self.store_circuit_breaker.as_ref()]
    }

    /// A snapshot of the processing counters (`spec.md` §6 supplemented
    /// feature: structured processing statistics).
    #[must_use]
    pub fn stats(&self) -> ProcessingStatsSnapshot {
        self.stats.snapshot()
    }

    /// Folds every event in the attached Event Store back through
    /// [`Self::handle_event`] in timestamp order, rebuilding the in-memory
    /// arena after a restart (`spec.md` §3 "restarts rehydrate ... by
    /// replay"). Returns the number of events replayed. A no-op, returning
    /// `0`, if no store is attached.
    pub async fn rehydrate_from_store(&self) -> TaskerResult<u64> {
        let Some(event_store) = &self.event_store else {
            return Ok(0);
        };
        let events = event_store.load_events().await?;
        self.replaying.store(true, Ordering::SeqCst);
        let result: TaskerResult<()> = async {
            for event in &events {
                self.handle_event(event).await?;
            }
            Ok(())
        }
        .await;
        self.replaying.store(false, Ordering::SeqCst);
        result?;
        Ok(events.len() as u64)
    }

    async fn publish(&self, run_id: RunId, payload: EventPayload) -> TaskerResult<()> {
        if self.replaying.load(Ordering::SeqCst) {
            // Rehydration already loaded this (and every derived) event from
            // the store; re-appending would duplicate it under a fresh
            // `event_id` and re-broadcasting would make live subscribers redo
            // the original run.
            return Ok(());
        }

        let event = Event::new(run_id, payload);

        if let Some(event_store) = &self.event_store {
            if self.store_circuit_breaker.should_allow() {
                let start = Instant::now();
                match event_store.append(&event).await {
                    Ok(()) => self.store_circuit_breaker.record_success(start.elapsed()),
                    Err(error) => {
                        self.store_circuit_breaker.record_failure(start.elapsed());
                        warn!(%error, event_id = %event.event_id, "event store append failed");
                    }
                }
            } else {
                warn!(event_id = %event.event_id, "event store circuit breaker open, skipping durable append");
            }
        }

        if !self.bus_circuit_breaker.should_allow() {
            return Err(TaskerError::TransportUnavailable(
                "state-service-bus circuit breaker open".to_string(),
            ));
        }
        let start = Instant::now();
        let result =
            publish_everywhere(&self.bus, &self.tasks_topic, &self.events_log_topic, &event).await;
        match &result {
            Ok(()) => self.bus_circuit_breaker.record_success(start.elapsed()),
            Err(_) => self.bus_circuit_breaker.record_failure(start.elapsed()),
        }
        result
    }

    /// Public operation invoked by the API collaborator (`spec.md` §4.3):
    /// generates `task_id`/`run_id`, publishes `RunStarted` and
    /// `TaskSubmitted`, and returns the id without touching the store
    /// directly — it is mutated only via the `TaskSubmitted` handler so
    /// behavior is identical for a local create and a replayed one.
    pub async fn create_root_task(
        &self,
        goal: impl Into<String>,
        task_type: TaskType,
        metadata: Value,
    ) -> TaskerResult<TaskId> {
        let task_id = TaskId::new();
        let run_id = RunId::from(task_id);
        let goal = goal.into();
        self.publish(
            run_id,
            EventPayload::RunStarted(RunStarted {
                input_data: Value::Null,
                config: metadata.clone(),
                run_mode: "live".to_string(),
                timestamp_utc: chrono::Utc::now(),
            }),
        )
        .await?;
        self.publish(
            run_id,
            EventPayload::TaskSubmitted(TaskSubmitted {
                task_id,
                root_task_id: task_id,
                goal,
                task_type,
                metadata,
            }),
        )
        .await?;
        Ok(task_id)
    }

    pub async fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.store.get(task_id).await
    }

    pub async fn get_tasks_by_root(&self, root_task_id: TaskId) -> Vec<Task> {
        self.store.get_by_root(root_task_id).await
    }

    /// Dispatch one event to its handler. An `Err` return tells the bus to
    /// NACK for redelivery; every handler below is idempotent so redelivery
    /// of an already-applied event is harmless (`spec.md` §4.3 "Failure
    /// semantics").
    pub async fn handle_event(&self, event: &Event) -> TaskerResult<()> {
        self.stats.record_event();
        match &event.payload {
            EventPayload::TaskSubmitted(p) => self.on_task_submitted(event.run_id, p).await,
            EventPayload::SubtasksPlanned(p) => self.on_subtasks_planned(event.run_id, p).await,
            EventPayload::TaskCompleted(p) => self.on_task_completed(event.run_id, p).await,
            EventPayload::TaskFailed(p) => self.on_task_failed(event.run_id, p).await,
            EventPayload::TaskAssigned(p) => self.on_task_assigned(event.run_id, p).await,
            EventPayload::TaskStarted(p) => self.on_task_started(event.run_id, p).await,
            EventPayload::StepStarted(p) => self.on_step_started(p),
            _ => Ok(()),
        }
    }

    /// Counts ReAct steps per root task so `RunFinished.total_steps` reflects
    /// the number of `StepStarted` events, not the arena's node count.
    fn on_step_started(&self, p: &StepStarted) -> TaskerResult<()> {
        let mut counts = self.step_counts.lock().expect("step_counts mutex poisoned");
        *counts.entry(p.root_id).or_insert(0) += 1;
        Ok(())
    }

    async fn on_task_submitted(&self, run_id: RunId, p: &TaskSubmitted) -> TaskerResult<()> {
        if self.store.get(p.task_id).await.is_some() {
            return Ok(());
        }
        let nid = Nid::root();
        let task = Task::new(
            p.task_id,
            p.root_task_id,
            None,
            nid.clone(),
            p.task_type,
            p.goal.clone(),
            p.metadata.clone(),
            BTreeSet::new(),
        );
        self.store.transaction(|tasks| tasks.insert(p.task_id, task)).await;
        self.stats.record_ready();

        self.publish(
            run_id,
            EventPayload::NodeCreated(NodeCreated {
                node_id: p.task_id,
                node_nid: nid.as_str().to_string(),
                node_type: node_type_for(p.task_type).to_string(),
                task_type: p.task_type,
                task_goal: p.goal.clone(),
                layer: 0,
                outer_node_id: None,
                root_node_id: p.root_task_id,
                initial_parent_nids: Vec::new(),
                step: None,
            }),
        )
        .await?;
        // A root task always has no dependencies, so it is READY the instant
        // it is created; the `nodes` table's `NodeCreated` projection always
        // inserts PENDING_DEPS, so this transition must be observed explicitly.
        self.publish(
            run_id,
            EventPayload::NodeStatusChanged(NodeStatusChanged {
                node_id: p.task_id,
                old_status: TaskStatus::PendingDeps.as_str().to_string(),
                new_status: TaskStatus::Ready.as_str().to_string(),
                step: None,
            }),
        )
        .await?;
        self.publish(
            run_id,
            EventPayload::TaskReady(TaskReady {
                task_id: p.task_id,
                root_task_id: p.root_task_id,
            }),
        )
        .await
    }

    async fn on_subtasks_planned(&self, run_id: RunId, p: &SubtasksPlanned) -> TaskerResult<()> {
        let Some(parent) = self.store.get(p.parent_task_id).await else {
            return Err(TaskerError::TaskNotFound(p.parent_task_id.0));
        };

        if let Err(reason) = validate_subtask_graph(&p.subtasks) {
            warn!(parent_task_id = %p.parent_task_id, %reason, "rejecting invalid subtask plan");
            return self
                .fail_task_and_propagate(run_id, p.parent_task_id, parent.root_task_id, reason)
                .await;
        }

        let local_to_global: HashMap<String, TaskId> = p
            .subtasks
            .iter()
            .map(|s| (s.id.clone(), TaskId::derived(p.parent_task_id, &s.id)))
            .collect();
        // Nids only depend on a subtask's own position in the plan, so they
        // can be computed up front and used by both passes regardless of
        // forward references.
        let local_to_nid: HashMap<String, Nid> = p
            .subtasks
            .iter()
            .enumerate()
            .map(|(index, s)| (s.id.clone(), Nid::child(&parent.nid, index + 1)))
            .collect();

        let mut newly_ready = Vec::new();
        let mut created: Vec<(TaskId, Nid, TaskType, String, Vec<String>)> = Vec::new();
        let mut edges: Vec<(TaskId, TaskId, String, String)> = Vec::new();
        self.store
            .transaction(|tasks| {
                // Pass 1: insert every new task. Two passes are needed
                // because a dependency may be a sibling defined later in
                // `p.subtasks` (forward reference by local id) and must
                // already exist in the arena before pass 2 records it as a
                // dependent.
                for subtask in &p.subtasks {
                    let task_id = local_to_global[&subtask.id];
                    let nid = local_to_nid[&subtask.id].clone();
                    let dependencies: BTreeSet<TaskId> = subtask
                        .depends_on
                        .iter()
                        .filter_map(|local| local_to_global.get(local).copied())
                        .collect();
                    let initial_parent_nids: Vec<String> = subtask
                        .depends_on
                        .iter()
                        .filter_map(|local| local_to_nid.get(local))
                        .map(|nid| nid.as_str().to_string())
                        .collect();
                    let task = Task::new(
                        task_id,
                        parent.root_task_id,
                        Some(parent.task_id),
                        nid.clone(),
                        subtask.task_type,
                        subtask.goal.clone(),
                        Value::Null,
                        dependencies,
                    );
                    if task.status == TaskStatus::Ready {
                        newly_ready.push(task_id);
                    }
                    created.push((task_id, nid, subtask.task_type, subtask.goal.clone(), initial_parent_nids));
                    tasks.insert(task_id, task);
                }

                // Pass 2: populate each dependency's `dependents` set
                // (invariant 3: mutual dependencies/dependents).
                for subtask in &p.subtasks {
                    let task_id = local_to_global[&subtask.id];
                    let child_nid = &local_to_nid[&subtask.id];
                    for dep in &subtask.depends_on {
                        if let Some(&dep_id) = local_to_global.get(dep) {
                            if let Some(dep_task) = tasks.get_mut(&dep_id) {
                                dep_task.dependents.insert(task_id);
                            }
                            edges.push((
                                dep_id,
                                task_id,
                                local_to_nid[dep].as_str().to_string(),
                                child_nid.as_str().to_string(),
                            ));
                        }
                    }
                }
            })
            .await;

        for (task_id, nid, task_type, goal, initial_parent_nids) in &created {
            self.publish(
                run_id,
                EventPayload::NodeCreated(NodeCreated {
                    node_id: *task_id,
                    node_nid: nid.as_str().to_string(),
                    node_type: node_type_for(*task_type).to_string(),
                    task_type: *task_type,
                    task_goal: goal.clone(),
                    layer: (nid.depth() - 1) as u32,
                    outer_node_id: Some(parent.task_id),
                    root_node_id: parent.root_task_id,
                    initial_parent_nids: initial_parent_nids.clone(),
                    step: None,
                }),
            )
            .await?;
        }
        for (parent_id, child_id, parent_nid, child_nid) in &edges {
            self.publish(
                run_id,
                EventPayload::EdgeAdded(EdgeAdded {
                    parent_node_id: *parent_id,
                    child_node_id: *child_id,
                    parent_nid: parent_nid.clone(),
                    child_nid: child_nid.clone(),
                    metadata: None,
                }),
            )
            .await?;
        }

        newly_ready.sort_unstable();
        for task_id in newly_ready {
            self.stats.record_ready();
            self.publish(
                run_id,
                EventPayload::NodeStatusChanged(NodeStatusChanged {
                    node_id: task_id,
                    old_status: TaskStatus::PendingDeps.as_str().to_string(),
                    new_status: TaskStatus::Ready.as_str().to_string(),
                    step: None,
                }),
            )
            .await?;
            self.publish(
                run_id,
                EventPayload::TaskReady(TaskReady {
                    task_id,
                    root_task_id: parent.root_task_id,
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn on_task_completed(&self, run_id: RunId, p: &TaskCompleted) -> TaskerResult<()> {
        let mut newly_ready = Vec::new();
        let mut root_completed = false;
        let mut already_completed = true;
        let mut prev_status = None;
        self.store
            .transaction(|tasks| {
                let already_done = tasks
                    .get(&p.task_id)
                    .map(|t| t.status == TaskStatus::Completed)
                    .unwrap_or(true);
                if already_done {
                    return;
                }
                already_completed = false;
                prev_status = tasks.get(&p.task_id).map(|t| t.status);
                let dependents: Vec<TaskId> = tasks
                    .get(&p.task_id)
                    .map(|t| t.dependents.iter().copied().collect())
                    .unwrap_or_default();
                let is_root = tasks.get(&p.task_id).map(Task::is_root).unwrap_or(false);

                if let Some(task) = tasks.get_mut(&p.task_id) {
                    task.status = TaskStatus::Completed;
                    task.result = Some(p.result.clone());
                    task.updated_at = chrono::Utc::now();
                }

                for dependent_id in dependents {
                    let all_deps_completed = tasks.get(&dependent_id).is_some_and(|dependent| {
                        dependent
                            .dependencies
                            .iter()
                            .all(|dep| tasks.get(dep).is_some_and(|d| d.status == TaskStatus::Completed))
                    });
                    if !all_deps_completed {
                        continue;
                    }
                    if let Some(dependent) = tasks.get_mut(&dependent_id) {
                        if dependent.status == TaskStatus::PendingDeps {
                            dependent.status = TaskStatus::Ready;
                            newly_ready.push(dependent_id);
                        }
                    }
                }

                if is_root {
                    root_completed = true;
                }
            })
            .await;

        if !already_completed {
            self.stats.record_completed();
            if let Some(prev_status) = prev_status {
                self.publish(
                    run_id,
                    EventPayload::NodeStatusChanged(NodeStatusChanged {
                        node_id: p.task_id,
                        old_status: prev_status.as_str().to_string(),
                        new_status: TaskStatus::Completed.as_str().to_string(),
                        step: None,
                    }),
                )
                .await?;
            }
            self.publish(
                run_id,
                EventPayload::NodeResultAvailable(NodeResultAvailable {
                    node_id: p.task_id,
                    result_summary: p.result.to_string(),
                }),
            )
            .await?;
        }

        newly_ready.sort_unstable();
        for task_id in newly_ready {
            self.stats.record_ready();
            self.publish(
                run_id,
                EventPayload::NodeStatusChanged(NodeStatusChanged {
                    node_id: task_id,
                    old_status: TaskStatus::PendingDeps.as_str().to_string(),
                    new_status: TaskStatus::Ready.as_str().to_string(),
                    step: None,
                }),
            )
            .await?;
            self.publish(
                run_id,
                EventPayload::TaskReady(TaskReady {
                    task_id,
                    root_task_id: p.root_task_id,
                }),
            )
            .await?;
        }

        if root_completed {
            let total_nodes = self.store.get_by_root(p.root_task_id).await.len() as u64;
            let total_steps = self
                .step_counts
                .lock()
                .expect("step_counts mutex poisoned")
                .remove(&p.root_task_id)
                .unwrap_or(0);
            self.publish(
                run_id,
                EventPayload::RunFinished(RunFinished {
                    total_steps,
                    total_nodes,
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn on_task_failed(&self, run_id: RunId, p: &TaskFailed) -> TaskerResult<()> {
        self.fail_task_and_propagate(run_id, p.task_id, p.root_task_id, p.error_info.clone())
            .await
    }

    /// Marks `task_id` FAILED (if not already) and fail-fast-propagates to
    /// every transitive dependent via an iterative worklist, not recursion
    /// (`spec.md` §9 "Error propagation across dependents"). Publishes
    /// `TaskFailed` for every newly-failed task and `RunError` if the run's
    /// root task is among them.
    async fn fail_task_and_propagate(
        &self,
        run_id: RunId,
        task_id: TaskId,
        root_task_id: TaskId,
        reason: String,
    ) -> TaskerResult<()> {
        let mut propagated: Vec<(TaskId, TaskStatus)> = Vec::new();
        let mut root_failed = false;
        let mut newly_failed = false;
        let mut prev_status = None;

        self.store
            .transaction(|tasks| {
                let already_failed = tasks
                    .get(&task_id)
                    .map(|t| t.status == TaskStatus::Failed)
                    .unwrap_or(true);
                if already_failed {
                    return;
                }
                newly_failed = true;
                prev_status = tasks.get(&task_id).map(|t| t.status);

                if let Some(task) = tasks.get_mut(&task_id) {
                    task.status = TaskStatus::Failed;
                    task.error_info = Some(reason.clone());
                }
                if tasks.get(&task_id).map(Task::is_root).unwrap_or(false) {
                    root_failed = true;
                }

                let mut queue: VecDeque<TaskId> = tasks
                    .get(&task_id)
                    .map(|t| t.dependents.iter().copied().collect())
                    .unwrap_or_default();
                let mut visited: HashSet<TaskId> = HashSet::new();
                while let Some(id) = queue.pop_front() {
                    if !visited.insert(id) {
                        continue;
                    }
                    let already_failed = tasks.get(&id).map(|t| t.status == TaskStatus::Failed).unwrap_or(true);
                    if already_failed {
                        continue;
                    }
                    let old_status = tasks.get(&id).map(|t| t.status);
                    if let Some(t) = tasks.get_mut(&id) {
                        t.status = TaskStatus::Failed;
                        t.error_info = Some("upstream failure".to_string());
                        if let Some(old_status) = old_status {
                            propagated.push((id, old_status));
                        }
                        if t.is_root() {
                            root_failed = true;
                        }
                        for dep in t.dependents.iter().copied() {
                            queue.push_back(dep);
                        }
                    }
                }
            })
            .await;

        if newly_failed {
            self.stats.record_failed();
            if let Some(prev_status) = prev_status {
                self.publish(
                    run_id,
                    EventPayload::NodeStatusChanged(NodeStatusChanged {
                        node_id: task_id,
                        old_status: prev_status.as_str().to_string(),
                        new_status: TaskStatus::Failed.as_str().to_string(),
                        step: None,
                    }),
                )
                .await?;
            }
        }

        for (id, old_status) in propagated {
            self.stats.record_failed();
            self.publish(
                run_id,
                EventPayload::NodeStatusChanged(NodeStatusChanged {
                    node_id: id,
                    old_status: old_status.as_str().to_string(),
                    new_status: TaskStatus::Failed.as_str().to_string(),
                    step: None,
                }),
            )
            .await?;
            self.publish(
                run_id,
                EventPayload::TaskFailed(TaskFailed {
                    task_id: id,
                    root_task_id,
                    error_info: "upstream failure".to_string(),
                }),
            )
            .await?;
        }

        if root_failed {
            self.publish(
                run_id,
                EventPayload::RunError(RunError {
                    error_message: reason,
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn on_task_assigned(&self, run_id: RunId, p: &TaskAssigned) -> TaskerResult<()> {
        let mut transitioned = false;
        self.store
            .transaction(|tasks| {
                if let Some(task) = tasks.get_mut(&p.task_id) {
                    if task.status.can_transition_to(TaskStatus::Assigned) {
                        task.status = TaskStatus::Assigned;
                        transitioned = true;
                    }
                }
            })
            .await;
        if transitioned {
            self.publish(
                run_id,
                EventPayload::NodeStatusChanged(NodeStatusChanged {
                    node_id: p.task_id,
                    old_status: TaskStatus::Ready.as_str().to_string(),
                    new_status: TaskStatus::Assigned.as_str().to_string(),
                    step: None,
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn on_task_started(&self, run_id: RunId, p: &TaskStarted) -> TaskerResult<()> {
        let mut transitioned = false;
        self.store
            .transaction(|tasks| {
                if let Some(task) = tasks.get_mut(&p.task_id) {
                    if task.status.can_transition_to(TaskStatus::Running) {
                        task.status = TaskStatus::Running;
                        transitioned = true;
                    }
                }
            })
            .await;
        if transitioned {
            self.publish(
                run_id,
                EventPayload::NodeStatusChanged(NodeStatusChanged {
                    node_id: p.task_id,
                    old_status: TaskStatus::Assigned.as_str().to_string(),
                    new_status: TaskStatus::Running.as_str().to_string(),
                    step: None,
                }),
            )
            .await?;
        }
        Ok(())
    }
}

/// Derives `NodeCreated.node_type` from the task's type: a `PLANNING` task
/// decomposes further via `SubtasksPlanned`, every other type is a leaf
/// (`spec.md` §9 "PLAN_NODE vs EXECUTE_NODE").
fn node_type_for(task_type: TaskType) -> &'static str {
    if task_type == TaskType::Planning {
        "PLAN_NODE"
    } else {
        "EXECUTE_NODE"
    }
}

/// Validates a subtask plan before it is applied: no duplicate local ids, no
/// dangling `depends_on` references, and the induced dependency graph is
/// acyclic. Cycle detection is Kahn's algorithm (iterative topological sort)
/// rather than recursive DFS, per `spec.md` §9.
fn validate_subtask_graph(subtasks: &[SubtaskDefinition]) -> Result<(), String> {
    let mut seen: HashSet<&str> = HashSet::new();
    for s in subtasks {
        if !seen.insert(s.id.as_str()) {
            return Err(format!("duplicate subtask id {:?}", s.id));
        }
    }
    for s in subtasks {
        for dep in &s.depends_on {
            if !seen.contains(dep.as_str()) {
                return Err(format!("subtask {:?} depends_on unknown id {:?}", s.id, dep));
            }
        }
    }

    let mut indegree: HashMap<&str, usize> = subtasks.iter().map(|s| (s.id.as_str(), 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for s in subtasks {
        for dep in &s.depends_on {
            *indegree.get_mut(s.id.as_str()).expect("id was just inserted") += 1;
            adjacency.entry(dep.as_str()).or_default().push(s.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut processed = 0usize;
    while let Some(id) = queue.pop_front() {
        processed += 1;
        if let Some(children) = adjacency.get(id) {
            for &child in children {
                let remaining = indegree.get_mut(child).expect("child is a known subtask id");
                *remaining -= 1;
                if *remaining == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    if processed != subtasks.len() {
        return Err("cyclic dependency among subtasks".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasker_shared::bus::InMemoryEventBus;

    fn service() -> StateService {
        StateService::new(EventBusKind::from(InMemoryEventBus::new()), "tasks", "events-log")
    }

    fn subtask(id: &str, depends_on: &[&str]) -> SubtaskDefinition {
        SubtaskDefinition {
            id: id.to_string(),
            goal: format!("do {id}"),
            task_type: TaskType::Composition,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            atom: true,
        }
    }

    #[test]
    fn test_validate_accepts_acyclic_chain() {
        let subtasks = vec![subtask("1", &[]), subtask("2", &["1"]), subtask("3", &["2"])];
        assert!(validate_subtask_graph(&subtasks).is_ok());
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let subtasks = vec![subtask("1", &["2"]), subtask("2", &["1"])];
        assert!(validate_subtask_graph(&subtasks).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_id() {
        let subtasks = vec![subtask("1", &[]), subtask("1", &[])];
        assert!(validate_subtask_graph(&subtasks).is_err());
    }

    #[test]
    fn test_validate_rejects_dangling_dependency() {
        let subtasks = vec![subtask("1", &["missing"])];
        assert!(validate_subtask_graph(&subtasks).is_err());
    }

    #[tokio::test]
    async fn test_create_root_task_is_pending_until_submitted_handled() {
        let svc = service();
        let task_id = svc
            .create_root_task("goal", TaskType::Composition, Value::Null)
            .await
            .unwrap();
        assert!(svc.get_task(task_id).await.is_none());
    }

    #[tokio::test]
    async fn test_task_submitted_handler_makes_task_ready() {
        let svc = service();
        let task_id = TaskId::new();
        let event = Event::new(
            RunId::from(task_id),
            EventPayload::TaskSubmitted(TaskSubmitted {
                task_id,
                root_task_id: task_id,
                goal: "goal".to_string(),
                task_type: TaskType::Composition,
                metadata: Value::Null,
            }),
        );
        svc.handle_event(&event).await.unwrap();
        let task = svc.get_task(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Ready);
    }

    #[tokio::test]
    async fn test_task_completed_unblocks_dependent() {
        let svc = service();
        let root = TaskId::new();
        let run_id = RunId::from(root);
        svc.handle_event(&Event::new(
            run_id,
            EventPayload::TaskSubmitted(TaskSubmitted {
                task_id: root,
                root_task_id: root,
                goal: "plan".to_string(),
                task_type: TaskType::Planning,
                metadata: Value::Null,
            }),
        ))
        .await
        .unwrap();

        svc.handle_event(&Event::new(
            run_id,
            EventPayload::SubtasksPlanned(SubtasksPlanned {
                parent_task_id: root,
                subtasks: vec![subtask("1", &[]), subtask("2", &["1"])],
            }),
        ))
        .await
        .unwrap();

        let children = svc.get_tasks_by_root(root).await;
        let first = children.iter().find(|t| t.dependencies.is_empty() && t.task_id != root).unwrap();
        let second = children.iter().find(|t| !t.dependencies.is_empty()).unwrap();
        assert_eq!(first.status, TaskStatus::Ready);
        assert_eq!(second.status, TaskStatus::PendingDeps);

        svc.handle_event(&Event::new(
            run_id,
            EventPayload::TaskCompleted(TaskCompleted {
                task_id: first.task_id,
                root_task_id: root,
                result: Value::Null,
            }),
        ))
        .await
        .unwrap();

        let second_after = svc.get_task(second.task_id).await.unwrap();
        assert_eq!(second_after.status, TaskStatus::Ready);
    }

    #[tokio::test]
    async fn test_task_failed_propagates_to_dependents() {
        let svc = service();
        let root = TaskId::new();
        let run_id = RunId::from(root);
        svc.handle_event(&Event::new(
            run_id,
            EventPayload::TaskSubmitted(TaskSubmitted {
                task_id: root,
                root_task_id: root,
                goal: "plan".to_string(),
                task_type: TaskType::Planning,
                metadata: Value::Null,
            }),
        ))
        .await
        .unwrap();
        svc.handle_event(&Event::new(
            run_id,
            EventPayload::SubtasksPlanned(SubtasksPlanned {
                parent_task_id: root,
                subtasks: vec![subtask("1", &[]), subtask("2", &["1"]), subtask("3", &["2"])],
            }),
        ))
        .await
        .unwrap();

        let children = svc.get_tasks_by_root(root).await;
        let first = children.iter().find(|t| t.dependencies.is_empty() && t.task_id != root).unwrap().clone();

        svc.handle_event(&Event::new(
            run_id,
            EventPayload::TaskFailed(TaskFailed {
                task_id: first.task_id,
                root_task_id: root,
                error_info: "boom".to_string(),
            }),
        ))
        .await
        .unwrap();

        let after = svc.get_tasks_by_root(root).await;
        for task in &after {
            if task.task_id != root {
                assert_eq!(task.status, TaskStatus::Failed, "task {:?} should have failed", task.nid);
            }
        }
    }

    #[tokio::test]
    async fn test_duplicate_task_completed_is_idempotent() {
        let svc = service();
        let task_id = TaskId::new();
        let run_id = RunId::from(task_id);
        svc.handle_event(&Event::new(
            run_id,
            EventPayload::TaskSubmitted(TaskSubmitted {
                task_id,
                root_task_id: task_id,
                goal: "goal".to_string(),
                task_type: TaskType::Composition,
                metadata: Value::Null,
            }),
        ))
        .await
        .unwrap();

        let completed = Event::new(
            run_id,
            EventPayload::TaskCompleted(TaskCompleted {
                task_id,
                root_task_id: task_id,
                result: Value::Null,
            }),
        );
        svc.handle_event(&completed).await.unwrap();
        svc.handle_event(&completed).await.unwrap();

        let task = svc.get_task(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_cyclic_subtasks_planned_fails_parent() {
        let svc = service();
        let root = TaskId::new();
        let run_id = RunId::from(root);
        svc.handle_event(&Event::new(
            run_id,
            EventPayload::TaskSubmitted(TaskSubmitted {
                task_id: root,
                root_task_id: root,
                goal: "plan".to_string(),
                task_type: TaskType::Planning,
                metadata: Value::Null,
            }),
        ))
        .await
        .unwrap();

        svc.handle_event(&Event::new(
            run_id,
            EventPayload::SubtasksPlanned(SubtasksPlanned {
                parent_task_id: root,
                subtasks: vec![subtask("1", &["2"]), subtask("2", &["1"])],
            }),
        ))
        .await
        .unwrap();

        let parent = svc.get_task(root).await.unwrap();
        assert_eq!(parent.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_stats_count_ready_completed_and_failed() {
        let svc = service();
        let root = TaskId::new();
        let run_id = RunId::from(root);
        svc.handle_event(&Event::new(
            run_id,
            EventPayload::TaskSubmitted(TaskSubmitted {
                task_id: root,
                root_task_id: root,
                goal: "goal".to_string(),
                task_type: TaskType::Composition,
                metadata: Value::Null,
            }),
        ))
        .await
        .unwrap();

        svc.handle_event(&Event::new(
            run_id,
            EventPayload::TaskCompleted(TaskCompleted {
                task_id: root,
                root_task_id: root,
                result: Value::Null,
            }),
        ))
        .await
        .unwrap();

        let stats = svc.stats();
        assert_eq!(stats.tasks_ready_computed, 1);
        assert_eq!(stats.tasks_completed, 1);
        assert!(stats.events_processed >= 2);
    }

    #[tokio::test]
    async fn test_rehydrate_without_store_is_a_noop() {
        let svc = service();
        assert_eq!(svc.rehydrate_from_store().await.unwrap(), 0);
    }
}
