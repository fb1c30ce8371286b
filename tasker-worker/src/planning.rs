//! The Planning Worker (`spec.md` §4.5): decomposes a PLANNING task's goal
//! into subtasks via the LLM, publishing `SubtasksPlanned` + `TaskCompleted`
//! on success or `TaskFailed` after exhausting `max_planning_loops` retries.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use uuid::Uuid;

use tasker_orchestration::StateService;
use tasker_shared::bus::{publish_everywhere, EventBusKind};
use tasker_shared::config::PlanningWorkerConfig;
use tasker_shared::errors::{TaskerError, TaskerResult};
use tasker_shared::events::{
    Event, EventPayload, LlmCallCompleted, LlmCallStarted, SubtasksPlanned, TaskAssigned,
    TaskCompleted, TaskFailed, TaskStarted,
};
use tasker_shared::resilience::{CircuitBreaker, CircuitBreakerBehavior};
use tasker_shared::task::SubtaskDefinition;

use crate::llm::{ChatMessage, LlmClient};
use crate::react::extract_json_block;

pub const WORKER_TYPE: &str = "planning-worker";

/// One subtask as parsed from the LLM's JSON list response, before it is
/// validated and turned into a [`SubtaskDefinition`].
#[derive(Debug, Deserialize)]
struct RawSubtask {
    id: String,
    goal: String,
    task_type: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    atom: bool,
}

#[derive(Clone)]
pub struct PlanningWorker {
    config: PlanningWorkerConfig,
    llm: Arc<dyn LlmClient>,
    bus: EventBusKind,
    tasks_topic: String,
    events_log_topic: String,
    llm_circuit_breaker: Arc<CircuitBreaker>,
}

impl std::fmt::Debug for PlanningWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanningWorker")
            .field("config", &self.config)
            .field("tasks_topic", &self.tasks_topic)
            .field("events_log_topic", &self.events_log_topic)
            .finish_non_exhaustive()
    }
}

impl PlanningWorker {
    #[must_use]
    pub fn new(
        config: PlanningWorkerConfig,
        llm: Arc<dyn LlmClient>,
        bus: EventBusKind,
        tasks_topic: impl Into<String>,
        events_log_topic: impl Into<String>,
    ) -> Self {
        let llm_circuit_breaker = Arc::new(CircuitBreaker::new(
            "planning-worker-llm",
            config.llm_circuit_breaker.to_resilience_config(),
        ));
        Self {
            config,
            llm,
            bus,
            tasks_topic: tasks_topic.into(),
            events_log_topic: events_log_topic.into(),
            llm_circuit_breaker,
        }
    }

    /// Handle one `TaskAssigned`; events routed to other worker types are
    /// ignored (`spec.md` §4.5 step 1).
    pub async fn handle_event(&self, event: &Event, state: &StateService) -> TaskerResult<()> {
        let EventPayload::TaskAssigned(assigned) = &event.payload else {
            return Ok(());
        };
        if assigned.worker_type != WORKER_TYPE {
            return Ok(());
        }
        self.run(event.run_id, assigned, state).await
    }

    async fn run(
        &self,
        run_id: tasker_shared::ids::RunId,
        assigned: &TaskAssigned,
        state: &StateService,
    ) -> TaskerResult<()> {
        let task = state
            .get_task(assigned.task_id)
            .await
            .ok_or(TaskerError::TaskNotFound(assigned.task_id.0))?;

        self.publish(
            run_id,
            EventPayload::TaskStarted(TaskStarted {
                task_id: assigned.task_id,
                root_task_id: assigned.root_task_id,
                worker_id: "planning-worker".to_string(),
            }),
        )
        .await?;

        let mut last_error = String::new();
        for attempt in 0..self.config.max_planning_loops {
            let temperature = (self.config.temperature - 0.05 * attempt as f32).max(0.0);
            match self.attempt_plan(run_id, &task.goal, temperature).await {
                Ok(subtasks) => {
                    let plan_summary = serde_json::json!({ "subtask_count": subtasks.len() });
                    self.publish(
                        run_id,
                        EventPayload::SubtasksPlanned(SubtasksPlanned {
                            parent_task_id: assigned.task_id,
                            subtasks,
                        }),
                    )
                    .await?;
                    self.publish(
                        run_id,
                        EventPayload::TaskCompleted(TaskCompleted {
                            task_id: assigned.task_id,
                            root_task_id: assigned.root_task_id,
                            result: plan_summary,
                        }),
                    )
                    .await?;
                    return Ok(());
                }
                Err(error) => {
                    last_error = error.to_string();
                    tracing::warn!(
                        task_id = %assigned.task_id,
                        attempt,
                        error = %last_error,
                        "planning attempt failed"
                    );
                }
            }
        }

        self.publish(
            run_id,
            EventPayload::TaskFailed(TaskFailed {
                task_id: assigned.task_id,
                root_task_id: assigned.root_task_id,
                error_info: format!("planning failed after retries: {last_error}"),
            }),
        )
        .await
    }

    async fn attempt_plan(
        &self,
        run_id: tasker_shared::ids::RunId,
        goal: &str,
        temperature: f32,
    ) -> TaskerResult<Vec<SubtaskDefinition>> {
        let messages = [
            ChatMessage::system(PLANNING_SYSTEM_PROMPT),
            ChatMessage::user(format!("Goal: {goal}\n\nRespond with a JSON list only.")),
        ];
        if !self.llm_circuit_breaker.should_allow() {
            return Err(TaskerError::ExternalError {
                collaborator: "llm".to_string(),
                message: "planning-worker-llm circuit breaker open".to_string(),
            });
        }
        let call_id = Uuid::now_v7();
        self.publish(
            run_id,
            EventPayload::LlmCallStarted(LlmCallStarted {
                call_id,
                agent_class: WORKER_TYPE.to_string(),
                model: self.config.model.clone(),
                prompt_summary: goal.to_string(),
            }),
        )
        .await?;
        let start = Instant::now();
        let response = match self.llm.chat_completion(&self.config.model, &messages, Some(temperature)).await {
            Ok(response) => {
                self.llm_circuit_breaker.record_success(start.elapsed());
                self.publish(
                    run_id,
                    EventPayload::LlmCallCompleted(LlmCallCompleted {
                        call_id,
                        agent_class: WORKER_TYPE.to_string(),
                        model: self.config.model.clone(),
                        response_summary: response.content.clone(),
                        duration_seconds: start.elapsed().as_secs_f64(),
                        usage: serde_json::to_value(response.usage).unwrap_or(serde_json::Value::Null),
                    }),
                )
                .await?;
                response
            }
            Err(error) => {
                self.llm_circuit_breaker.record_failure(start.elapsed());
                self.publish(
                    run_id,
                    EventPayload::LlmCallCompleted(LlmCallCompleted {
                        call_id,
                        agent_class: WORKER_TYPE.to_string(),
                        model: self.config.model.clone(),
                        response_summary: error.to_string(),
                        duration_seconds: start.elapsed().as_secs_f64(),
                        usage: serde_json::Value::Null,
                    }),
                )
                .await?;
                return Err(error);
            }
        };

        let json = extract_json_block(&response.content)
            .ok_or_else(|| TaskerError::ValidationError("no JSON list in planner response".to_string()))?;
        let raw: Vec<RawSubtask> = serde_json::from_str(&json)
            .map_err(|e| TaskerError::ValidationError(format!("malformed subtask list: {e}")))?;

        let subtasks: Vec<SubtaskDefinition> = raw
            .into_iter()
            .map(|r| {
                Ok(SubtaskDefinition {
                    id: r.id,
                    goal: r.goal,
                    task_type: tasker_shared::task::TaskType::parse(&r.task_type)?,
                    depends_on: r.depends_on,
                    atom: r.atom,
                })
            })
            .collect::<TaskerResult<Vec<_>>>()?;

        validate_plan(&subtasks)?;
        Ok(subtasks)
    }

    async fn publish(&self, run_id: tasker_shared::ids::RunId, payload: EventPayload) -> TaskerResult<()> {
        let event = Event::new(run_id, payload);
        publish_everywhere(&self.bus, &self.tasks_topic, &self.events_log_topic, &event).await
    }
}

const PLANNING_SYSTEM_PROMPT: &str = "You decompose a goal into subtasks. \
Respond with a JSON list of objects {id, goal, task_type, depends_on?, atom?}. \
task_type is one of PLANNING, COMPOSITION, REASONING, RETRIEVAL, REFLECTION, AGGREGATION. \
depends_on lists local ids of subtasks this one depends on. No duplicate ids, no cycles.";

/// Mirrors the State Service's own acyclic/dangling-reference checks
/// (`spec.md` §4.5 step 6), applied before the plan is ever published so a
/// malformed LLM response is retried here rather than failing the parent
/// task by way of the State Service's rejection path.
fn validate_plan(subtasks: &[SubtaskDefinition]) -> TaskerResult<()> {
    use std::collections::{HashMap, HashSet};

    let mut seen = HashSet::new();
    for s in subtasks {
        if !seen.insert(s.id.as_str()) {
            return Err(TaskerError::ValidationError(format!(
                "duplicate subtask id {}",
                s.id
            )));
        }
    }
    let ids: HashSet<&str> = subtasks.iter().map(|s| s.id.as_str()).collect();
    for s in subtasks {
        for dep in &s.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(TaskerError::ValidationError(format!(
                    "subtask {} depends on unknown id {dep}",
                    s.id
                )));
            }
        }
    }

    let mut indegree: HashMap<&str, usize> = subtasks.iter().map(|s| (s.id.as_str(), 0)).collect();
    for s in subtasks {
        *indegree.get_mut(s.id.as_str()).unwrap() += s.depends_on.len();
    }
    let mut queue: std::collections::VecDeque<&str> = indegree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0;
    let dependents: HashMap<&str, Vec<&str>> = {
        let mut map: HashMap<&str, Vec<&str>> = HashMap::new();
        for s in subtasks {
            for dep in &s.depends_on {
                map.entry(dep.as_str()).or_default().push(s.id.as_str());
            }
        }
        map
    };
    while let Some(id) = queue.pop_front() {
        visited += 1;
        if let Some(deps) = dependents.get(id) {
            for &next in deps {
                let entry = indegree.get_mut(next).unwrap();
                *entry -= 1;
                if *entry == 0 {
                    queue.push_back(next);
                }
            }
        }
    }
    if visited != subtasks.len() {
        return Err(TaskerError::ValidationError(
            "cyclic subtask plan".to_string(),
        ));
    }
    Ok(())
}
