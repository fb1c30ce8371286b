//! The Execution Worker (`spec.md` §4.6): runs a leaf task through a bounded
//! ReAct loop over the registered [`ActionCatalog`], stopping on `finish`,
//! `max_turns`, or cancellation.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tasker_orchestration::StateService;
use tasker_shared::bus::{publish_everywhere, EventBusKind};
use tasker_shared::config::ExecutionWorkerConfig;
use tasker_shared::errors::{TaskerError, TaskerResult};
use tasker_shared::events::{
    Event, EventPayload, LlmCallCompleted, LlmCallStarted, StepFinished, StepStarted, TaskAssigned,
    TaskCompleted, TaskFailed, TaskStarted, ToolInvoked, ToolReturned,
};
use tasker_shared::ids::RunId;
use tasker_shared::resilience::{CircuitBreaker, CircuitBreakerBehavior};
use tasker_shared::task::{Task, TaskStatus};

use crate::action::{ActionCatalog, ActionStatus};
use crate::llm::{ChatMessage, LlmClient};
use crate::react::extract_json_block;

/// One completed turn of the loop's history, threaded back into the next
/// prompt verbatim (`spec.md` §4.6 "Internal state").
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReactTurn {
    thought: Option<String>,
    action_name: Option<String>,
    action_args: Option<Value>,
    observation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LlmTurn {
    thought: String,
    action: LlmAction,
}

#[derive(Debug, Deserialize)]
struct LlmAction {
    action_name: String,
    #[serde(default)]
    action_args: Value,
}

#[derive(Clone)]
pub struct ExecutionWorker {
    config: ExecutionWorkerConfig,
    llm: Arc<dyn LlmClient>,
    catalog: ActionCatalog,
    bus: EventBusKind,
    tasks_topic: String,
    events_log_topic: String,
    /// The `worker_type` this instance answers `TaskAssigned` for. Defaults
    /// to `"execution-worker"`, but the same ReAct loop serves
    /// reflection/aggregation/retrieval workers under their own type names
    /// (`spec.md` §4.4 routing table).
    worker_type: String,
    llm_circuit_breaker: Arc<CircuitBreaker>,
}

impl std::fmt::Debug for ExecutionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionWorker")
            .field("config", &self.config)
            .field("catalog", &self.catalog)
            .field("worker_type", &self.worker_type)
            .finish_non_exhaustive()
    }
}

impl ExecutionWorker {
    #[must_use]
    pub fn new(
        config: ExecutionWorkerConfig,
        llm: Arc<dyn LlmClient>,
        catalog: ActionCatalog,
        bus: EventBusKind,
        tasks_topic: impl Into<String>,
        events_log_topic: impl Into<String>,
    ) -> Self {
        let llm_circuit_breaker = Arc::new(CircuitBreaker::new(
            "execution-worker-llm",
            config.llm_circuit_breaker.to_resilience_config(),
        ));
        Self {
            config,
            llm,
            catalog,
            bus,
            tasks_topic: tasks_topic.into(),
            events_log_topic: events_log_topic.into(),
            worker_type: "execution-worker".to_string(),
            llm_circuit_breaker,
        }
    }

    #[must_use]
    pub fn with_worker_type(mut self, worker_type: impl Into<String>) -> Self {
        self.worker_type = worker_type.into();
        self
    }

    pub async fn handle_event(
        &self,
        event: &Event,
        state: &StateService,
        cancellation: &CancellationToken,
    ) -> TaskerResult<()> {
        let EventPayload::TaskAssigned(assigned) = &event.payload else {
            return Ok(());
        };
        if assigned.worker_type != self.worker_type {
            return Ok(());
        }
        self.run(event.run_id, assigned, state, cancellation).await
    }

    async fn run(
        &self,
        run_id: RunId,
        assigned: &TaskAssigned,
        state: &StateService,
        cancellation: &CancellationToken,
    ) -> TaskerResult<()> {
        let task = state
            .get_task(assigned.task_id)
            .await
            .ok_or(TaskerError::TaskNotFound(assigned.task_id.0))?;

        // Idempotency: a duplicate TaskAssigned for a task already RUNNING
        // is a short-circuit ACK (`spec.md` §4.6 "Idempotency").
        if task.status == TaskStatus::Running {
            return Ok(());
        }

        self.publish(
            run_id,
            EventPayload::TaskStarted(TaskStarted {
                task_id: assigned.task_id,
                root_task_id: assigned.root_task_id,
                worker_id: self.worker_type.clone(),
            }),
        )
        .await?;

        let context = self.dependency_context(&task, state).await;
        let mut history: Vec<ReactTurn> = Vec::new();

        for step in 1..=self.config.max_turns {
            if cancellation.is_cancelled() {
                return self
                    .fail(run_id, &task, "cancelled", &history)
                    .await;
            }

            self.publish(
                run_id,
                EventPayload::StepStarted(StepStarted {
                    step,
                    node_id: task.task_id,
                    node_goal: task.goal.clone(),
                    task_type: task.task_type,
                    root_id: task.root_task_id,
                }),
            )
            .await?;

            if !self.llm_circuit_breaker.should_allow() {
                return Err(TaskerError::ExternalError {
                    collaborator: "llm".to_string(),
                    message: "execution-worker-llm circuit breaker open".to_string(),
                });
            }
            let messages = self.build_prompt(&task.goal, &context, &history);
            let call_id = Uuid::now_v7();
            self.publish(
                run_id,
                EventPayload::LlmCallStarted(LlmCallStarted {
                    call_id,
                    agent_class: self.worker_type.clone(),
                    model: self.config.model.clone(),
                    prompt_summary: task.goal.clone(),
                }),
            )
            .await?;
            let turn_start = Instant::now();
            let response = tokio::select! {
                result = self.llm.chat_completion(&self.config.model, &messages, Some(self.config.temperature)) => {
                    match result {
                        Ok(response) => {
                            self.llm_circuit_breaker.record_success(turn_start.elapsed());
                            self.publish(
                                run_id,
                                EventPayload::LlmCallCompleted(LlmCallCompleted {
                                    call_id,
                                    agent_class: self.worker_type.clone(),
                                    model: self.config.model.clone(),
                                    response_summary: response.content.clone(),
                                    duration_seconds: turn_start.elapsed().as_secs_f64(),
                                    usage: serde_json::to_value(response.usage).unwrap_or(Value::Null),
                                }),
                            )
                            .await?;
                            response
                        }
                        Err(error) => {
                            self.llm_circuit_breaker.record_failure(turn_start.elapsed());
                            self.publish(
                                run_id,
                                EventPayload::LlmCallCompleted(LlmCallCompleted {
                                    call_id,
                                    agent_class: self.worker_type.clone(),
                                    model: self.config.model.clone(),
                                    response_summary: error.to_string(),
                                    duration_seconds: turn_start.elapsed().as_secs_f64(),
                                    usage: Value::Null,
                                }),
                            )
                            .await?;
                            return Err(error);
                        }
                    }
                }
                () = cancellation.cancelled() => {
                    return self.fail(run_id, &task, "cancelled", &history).await;
                }
            };

            let Some(parsed) = extract_json_block(&response.content)
                .and_then(|json| serde_json::from_str::<LlmTurn>(&json).ok())
            else {
                history.push(ReactTurn {
                    thought: None,
                    action_name: None,
                    action_args: None,
                    observation: Some("no_action: failed to parse LLM response".to_string()),
                });
                self.publish(
                    run_id,
                    EventPayload::StepFinished(StepFinished {
                        step,
                        node_id: task.task_id,
                        action_name: None,
                        status_after: "no_action".to_string(),
                        duration_seconds: turn_start.elapsed().as_secs_f64(),
                    }),
                )
                .await?;
                continue;
            };

            let tool_call_id = Uuid::now_v7();
            let args_summary = parsed.action.action_args.to_string();
            self.publish(
                run_id,
                EventPayload::ToolInvoked(ToolInvoked {
                    tool_call_id,
                    tool_name: parsed.action.action_name.clone(),
                    api_name: None,
                    args_summary,
                    node_id: Some(task.task_id),
                    step: Some(step),
                }),
            )
            .await?;

            let action_start = Instant::now();
            let outcome = match self.catalog.get(&parsed.action.action_name) {
                Some(action) => action
                    .execute(parsed.action.action_args.clone())
                    .await
                    .unwrap_or_else(|e| crate::action::ActionOutcome::error(e.to_string())),
                None => crate::action::ActionOutcome::error(format!(
                    "unknown action: {}",
                    parsed.action.action_name
                )),
            };
            let duration = action_start.elapsed().as_secs_f64();

            let (state_str, result_summary) = match outcome.status {
                ActionStatus::Ok | ActionStatus::Finished => ("ok".to_string(), outcome.result.to_string()),
                ActionStatus::Error => ("error".to_string(), String::new()),
            };
            self.publish(
                run_id,
                EventPayload::ToolReturned(ToolReturned {
                    tool_call_id,
                    tool_name: parsed.action.action_name.clone(),
                    result_summary: result_summary.clone(),
                    state: state_str.clone(),
                    duration_seconds: duration,
                    error: outcome.error.clone(),
                    node_id: Some(task.task_id),
                    step: Some(step),
                }),
            )
            .await?;

            history.push(ReactTurn {
                thought: Some(parsed.thought),
                action_name: Some(parsed.action.action_name.clone()),
                action_args: Some(parsed.action.action_args.clone()),
                observation: Some(if outcome.status == ActionStatus::Error {
                    outcome.error.clone().unwrap_or_default()
                } else {
                    result_summary
                }),
            });

            self.publish(
                run_id,
                EventPayload::StepFinished(StepFinished {
                    step,
                    node_id: task.task_id,
                    action_name: Some(parsed.action.action_name.clone()),
                    status_after: state_str,
                    duration_seconds: duration,
                }),
            )
            .await?;

            if outcome.status == ActionStatus::Finished {
                let final_answer = outcome
                    .result
                    .get("final_answer")
                    .cloned()
                    .unwrap_or(Value::Null);
                return self.succeed(run_id, &task, final_answer, &history).await;
            }
        }

        self.fail(run_id, &task, "max turns exceeded", &history).await
    }

    async fn dependency_context(&self, task: &Task, state: &StateService) -> Vec<String> {
        let mut lines = Vec::with_capacity(task.dependencies.len());
        for dep_id in &task.dependencies {
            if let Some(dep) = state.get_task(*dep_id).await {
                let result = dep
                    .result
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "null".to_string());
                lines.push(format!("{}: {result}", dep.goal));
            }
        }
        lines
    }

    fn build_prompt(&self, goal: &str, context: &[String], history: &[ReactTurn]) -> Vec<ChatMessage> {
        let catalog_block = self
            .catalog
            .describe()
            .into_iter()
            .map(|(name, description, schema)| format!("- {name}: {description} (args: {schema})"))
            .collect::<Vec<_>>()
            .join("\n");

        let history_block = if history.is_empty() {
            "(no turns yet)".to_string()
        } else {
            history
                .iter()
                .enumerate()
                .map(|(i, turn)| {
                    format!(
                        "Turn {}: thought={:?} action={:?} args={:?} observation={:?}",
                        i + 1,
                        turn.thought,
                        turn.action_name,
                        turn.action_args,
                        turn.observation
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let context_block = if context.is_empty() {
            "(no dependency results)".to_string()
        } else {
            context.join("\n")
        };

        vec![
            ChatMessage::system(REACT_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Goal: {goal}\n\nDependency results:\n{context_block}\n\nAvailable actions:\n{catalog_block}\n\nHistory:\n{history_block}\n\nRespond with JSON: {{\"thought\": string, \"action\": {{\"action_name\": string, \"action_args\": object}}}}"
            )),
        ]
    }

    async fn succeed(
        &self,
        run_id: RunId,
        task: &Task,
        final_answer: Value,
        history: &[ReactTurn],
    ) -> TaskerResult<()> {
        self.publish(
            run_id,
            EventPayload::TaskCompleted(TaskCompleted {
                task_id: task.task_id,
                root_task_id: task.root_task_id,
                result: serde_json::json!({ "final_answer": final_answer, "history": history }),
            }),
        )
        .await
    }

    async fn fail(
        &self,
        run_id: RunId,
        task: &Task,
        reason: &str,
        history: &[ReactTurn],
    ) -> TaskerResult<()> {
        self.publish(
            run_id,
            EventPayload::TaskFailed(TaskFailed {
                task_id: task.task_id,
                root_task_id: task.root_task_id,
                error_info: serde_json::json!({ "reason": reason, "history": history }).to_string(),
            }),
        )
        .await
    }

    async fn publish(&self, run_id: RunId, payload: EventPayload) -> TaskerResult<()> {
        let event = Event::new(run_id, payload);
        publish_everywhere(&self.bus, &self.tasks_topic, &self.events_log_topic, &event).await
    }
}

const REACT_SYSTEM_PROMPT: &str = "You solve a goal step by step using the given actions. \
Each turn, think briefly then choose exactly one action. \
Call the `finish` action with `final_answer` once the goal is satisfied. \
Always respond with a single JSON object, no surrounding prose.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EchoAction, FinishAction, MockLlmClient};
    use tasker_shared::bus::InMemoryEventBus;
    use tasker_shared::events::TaskSubmitted;
    use tasker_shared::ids::TaskId;
    use tasker_shared::task::TaskType;

    async fn submitted_task(state: &StateService) -> TaskId {
        let task_id = TaskId::new();
        let run_id = RunId::from(task_id);
        state
            .handle_event(&Event::new(
                run_id,
                EventPayload::TaskSubmitted(TaskSubmitted {
                    task_id,
                    root_task_id: task_id,
                    goal: "echo hello".to_string(),
                    task_type: TaskType::Composition,
                    metadata: Value::Null,
                }),
            ))
            .await
            .unwrap();
        task_id
    }

    fn catalog() -> ActionCatalog {
        let mut catalog = ActionCatalog::new();
        catalog.register(Arc::new(EchoAction));
        catalog.register(Arc::new(FinishAction));
        catalog
    }

    #[tokio::test]
    async fn test_simple_finish_completes_task() {
        let bus = EventBusKind::from(InMemoryEventBus::new());
        let state = StateService::new(bus.clone(), "tasks", "events-log");
        let task_id = submitted_task(&state).await;
        let run_id = RunId::from(task_id);

        let script = vec![
            r#"{"thought": "echo first", "action": {"action_name": "echo", "action_args": {"message": "hello"}}}"#.to_string(),
            r#"{"thought": "done", "action": {"action_name": "finish", "action_args": {"final_answer": "hello"}}}"#.to_string(),
        ];
        let llm = Arc::new(MockLlmClient::new(script));
        let worker = ExecutionWorker::new(
            ExecutionWorkerConfig::default(),
            llm,
            catalog(),
            bus,
            "tasks",
            "events-log",
        );

        let assigned = Event::new(
            run_id,
            EventPayload::TaskAssigned(TaskAssigned {
                task_id,
                root_task_id: task_id,
                worker_type: "execution-worker".to_string(),
            }),
        );
        worker
            .handle_event(&assigned, &state, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_max_turns_exceeded_fails() {
        let bus = EventBusKind::from(InMemoryEventBus::new());
        let state = StateService::new(bus.clone(), "tasks", "events-log");
        let task_id = submitted_task(&state).await;
        let run_id = RunId::from(task_id);

        let script = vec![
            r#"{"thought": "loop", "action": {"action_name": "echo", "action_args": {"message": "x"}}}"#
                .to_string();
            2
        ];
        let llm = Arc::new(MockLlmClient::new(script));
        let config = ExecutionWorkerConfig {
            max_turns: 2,
            ..Default::default()
        };
        let worker = ExecutionWorker::new(config, llm, catalog(), bus, "tasks", "events-log");

        let assigned = Event::new(
            run_id,
            EventPayload::TaskAssigned(TaskAssigned {
                task_id,
                root_task_id: task_id,
                worker_type: "execution-worker".to_string(),
            }),
        );
        worker
            .handle_event(&assigned, &state, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_assignment_on_running_task_is_ignored() {
        let bus = EventBusKind::from(InMemoryEventBus::new());
        let state = StateService::new(bus.clone(), "tasks", "events-log");
        let task_id = submitted_task(&state).await;
        let run_id = RunId::from(task_id);

        state
            .handle_event(&Event::new(
                run_id,
                EventPayload::TaskAssigned(TaskAssigned {
                    task_id,
                    root_task_id: task_id,
                    worker_type: "execution-worker".to_string(),
                }),
            ))
            .await
            .unwrap();
        state
            .handle_event(&Event::new(
                run_id,
                EventPayload::TaskStarted(TaskStarted {
                    task_id,
                    root_task_id: task_id,
                    worker_id: "execution-worker".to_string(),
                }),
            ))
            .await
            .unwrap();

        let llm = Arc::new(MockLlmClient::new(vec![]));
        let worker = ExecutionWorker::new(
            ExecutionWorkerConfig::default(),
            llm,
            catalog(),
            bus,
            "tasks",
            "events-log",
        );

        let assigned = Event::new(
            run_id,
            EventPayload::TaskAssigned(TaskAssigned {
                task_id,
                root_task_id: task_id,
                worker_type: "execution-worker".to_string(),
            }),
        );
        worker
            .handle_event(&assigned, &state, &CancellationToken::new())
            .await
            .unwrap();
    }
}
