//! CLI entry point that wires the Event Bus, State Service, Scheduler, and
//! Planning/Execution Workers together to run a single task to completion,
//! printing its event trace (`spec.md` §8 S1 "Simple execution").

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use tasker_orchestration::{Scheduler, StateService};
use tasker_shared::bus::{EventBusKind, InMemoryEventBus, TaskerEventBus};
use tasker_shared::config::EngineConfig;
use tasker_shared::events::EventPayload;
use tasker_shared::ids::RunId;
use tasker_shared::logging;
use tasker_shared::resilience::{MetricsCollector, TracingMetricsCollector};
use tasker_shared::task::TaskType;
use tasker_worker::testing::{EchoAction, FinishAction, MockLlmClient};
use tasker_worker::{ActionCatalog, ExecutionWorker, PlanningWorker};

/// Submit one root task and drive it through the engine to completion.
#[derive(Parser, Debug)]
#[command(name = "tasker-engine", version, about)]
struct Args {
    /// The goal text for the root task.
    #[arg(long, default_value = "echo hello")]
    goal: String,

    /// Task type of the root task (PLANNING, COMPOSITION, REASONING, ...).
    #[arg(long, default_value = "COMPOSITION")]
    task_type: String,

    /// Configuration environment (`config/environments/{env}.toml`).
    #[arg(long, default_value = "development")]
    env: String,

    /// Maximum time to wait for the run to reach a terminal state.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Durably append every event to the Event Store (`config.store.database_url`)
    /// and rehydrate the State Service's arena from it at startup. Off by
    /// default since a demo run has no Postgres to reach.
    #[arg(long, default_value_t = false)]
    persist: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing("tasker_engine=info,tasker_orchestration=info,tasker_worker=info");

    let args = Args::parse();
    let config = EngineConfig::load(&args.env)?;
    let task_type = TaskType::parse(&args.task_type)?;

    let bus = EventBusKind::from(InMemoryEventBus::new());
    let tasks_topic = config.bus.tasks_topic.clone();
    let events_log_topic = config.bus.events_log_topic.clone();

    let mut state = StateService::new(bus.clone(), tasks_topic.clone(), events_log_topic.clone());
    let mut event_store = None;
    if args.persist {
        let store = tasker_store::EventStore::connect(
            &config.store.database_url,
            config.store.max_connections,
        )
        .await?;
        store.migrate().await?;
        let store = Arc::new(store);
        state = state.with_store(
            store.clone(),
            config.state_service.bus_circuit_breaker,
            config.state_service.store_circuit_breaker,
        );
        let rehydrated = state.rehydrate_from_store().await?;
        tracing::info!(rehydrated, "rehydrated state from event store");
        event_store = Some(store);
    }

    let scheduler = Scheduler::new(
        config.scheduler.clone(),
        bus.clone(),
        tasks_topic.clone(),
        events_log_topic.clone(),
    );

    // The demo catalog can only echo and finish; a real deployment registers
    // its own Action implementations and a real LlmClient in their place.
    let mut catalog = ActionCatalog::new();
    catalog.register(Arc::new(EchoAction));
    catalog.register(Arc::new(FinishAction));

    let llm = Arc::new(MockLlmClient::new(vec![
        format!(
            r#"{{"thought": "echo the goal", "action": {{"action_name": "echo", "action_args": {{"message": "{}"}}}}}}"#,
            args.goal.replace('"', "'")
        ),
        r#"{"thought": "done", "action": {"action_name": "finish", "action_args": {"final_answer": "ok"}}}"#
            .to_string(),
    ]));

    let execution_worker = ExecutionWorker::new(
        config.execution_worker.clone(),
        llm.clone(),
        catalog,
        bus.clone(),
        tasks_topic.clone(),
        events_log_topic.clone(),
    );
    let planning_worker = PlanningWorker::new(
        config.planning_worker.clone(),
        llm,
        bus.clone(),
        tasks_topic.clone(),
        events_log_topic.clone(),
    );

    let root_task_id = state
        .create_root_task(args.goal.clone(), task_type, serde_json::Value::Null)
        .await?;
    let run_id = RunId::from(root_task_id);

    tracing::info!(%run_id, goal = %args.goal, "submitted root task");

    let cancellation = CancellationToken::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout_secs);

    let outcome = 'run: loop {
        if tokio::time::Instant::now() >= deadline {
            break 'run Err(anyhow::anyhow!(
                "run {run_id} did not reach a terminal state within {}s",
                args.timeout_secs
            ));
        }

        let deliveries = tokio::select! {
            biased;
            () = cancellation.cancelled() => break 'run Ok(()),
            result = tokio::signal::ctrl_c(), if !cancellation.is_cancelled() => {
                result?;
                tracing::info!("received ctrl-c, shutting down");
                cancellation.cancel();
                continue 'run;
            }
            deliveries = bus.receive(&tasks_topic, "engine", "engine-1", &[], 16) => deliveries?,
        };
        if deliveries.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
            continue;
        }

        for delivery in deliveries {
            let event = &delivery.event;
            println!(
                "{:<20} run={} {}",
                event.event_type(),
                event.run_id,
                serde_json::to_string(&event.payload)?
            );

            // The Event Store is the sole consumer of the full firehose
            // (`spec.md` §3 "persisted indefinitely by the Event Store",
            // §4.2 "consumes the firehose"); append is idempotent on
            // `event_id`, so this is harmless alongside `StateService`'s own
            // durable writes of the events it publishes.
            if let Some(store) = &event_store {
                if let Err(error) = store.append(event).await {
                    tracing::warn!(%error, event_id = %event.event_id, "event store append failed");
                }
            }

            state.handle_event(event).await?;
            scheduler.handle_event(event, &state).await?;
            planning_worker.handle_event(event, &state).await?;
            execution_worker
                .handle_event(event, &state, &cancellation)
                .await?;

            bus.ack(&tasks_topic, "engine", &delivery).await?;

            if event.run_id == run_id
                && matches!(
                    event.payload,
                    EventPayload::RunFinished(_) | EventPayload::RunError(_)
                )
            {
                break 'run Ok(());
            }
        }
    };

    let collector = TracingMetricsCollector;
    for breaker in state.circuit_breakers() {
        collector.record_circuit_breaker_metrics(breaker.name(), &breaker.metrics());
    }
    tracing::info!(stats = ?state.stats(), scheduler_stats = ?scheduler.stats(), "engine run finished");

    outcome
}
