//! The Scheduler (`spec.md` §4.4): consumes `TaskReady`, consults the
//! routing table, and publishes `TaskAssigned` with the target worker type.

use std::sync::Arc;

use tasker_shared::bus::{publish_everywhere, EventBusKind};
use tasker_shared::config::SchedulerConfig;
use tasker_shared::errors::{TaskerError, TaskerResult};
use tasker_shared::events::{Event, EventPayload, TaskAssigned, TaskReady};
use tasker_shared::task::Task;

use crate::stats::{ProcessingStats, ProcessingStatsSnapshot};
use crate::state_service::StateService;

/// Translates `TaskReady` into `TaskAssigned` by looking up the ready task's
/// `task_type` in the configured routing table.
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
    bus: EventBusKind,
    tasks_topic: String,
    events_log_topic: String,
    stats: Arc<ProcessingStats>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        config: SchedulerConfig,
        bus: EventBusKind,
        tasks_topic: impl Into<String>,
        events_log_topic: impl Into<String>,
    ) -> Self {
        Self {
            config,
            bus,
            tasks_topic: tasks_topic.into(),
            events_log_topic: events_log_topic.into(),
            stats: Arc::new(ProcessingStats::default()),
        }
    }

    /// A snapshot of the processing counters (`spec.md` §6 supplemented
    /// feature: structured processing statistics).
    #[must_use]
    pub fn stats(&self) -> ProcessingStatsSnapshot {
        self.stats.snapshot()
    }

    /// Handle one `TaskReady`; any other event type is ignored. `fetch_task`
    /// loads the task to obtain its `task_type` (`spec.md` §4.4 "load the
    /// Task to obtain task_type"); in practice this is the State Service's
    /// `get_task`.
    pub async fn handle_event(&self, event: &Event, state: &StateService) -> TaskerResult<()> {
        let EventPayload::TaskReady(ready) = &event.payload else {
            return Ok(());
        };
        self.stats.record_event();
        self.assign(event.run_id, ready, state).await
    }

    async fn assign(
        &self,
        run_id: tasker_shared::ids::RunId,
        ready: &TaskReady,
        state: &StateService,
    ) -> TaskerResult<()> {
        let task: Task = state
            .get_task(ready.task_id)
            .await
            .ok_or(TaskerError::TaskNotFound(ready.task_id.0))?;

        let worker_type = self.config.worker_type_for(task.task_type).ok_or_else(|| {
            TaskerError::UnknownTaskType(format!(
                "no routing entry for task_type {:?} on task {}",
                task.task_type, ready.task_id
            ))
        })?;

        let event = Event::new(
            run_id,
            EventPayload::TaskAssigned(TaskAssigned {
                task_id: ready.task_id,
                root_task_id: ready.root_task_id,
                worker_type: worker_type.to_string(),
            }),
        );
        publish_everywhere(&self.bus, &self.tasks_topic, &self.events_log_topic, &event).await?;
        self.stats.record_assigned();
        Ok(())
    }
}
