//! The ActionCatalog (`spec.md` §4.6): the fixed set of tools an Execution
//! Worker's ReAct loop may invoke. Immutable after startup, so concurrent
//! reads need no locking (`spec.md` §5 "Shared-resource policy").

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use tasker_shared::errors::TaskerResult;

/// Outcome of one action invocation. `Finished` is the distinguished
/// terminal status the `finish` action returns, carrying `final_answer` in
/// `result` (`spec.md` §4.6 ActionCatalog contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Ok,
    Finished,
    Error,
}

#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub status: ActionStatus,
    pub result: Value,
    pub error: Option<String>,
}

impl ActionOutcome {
    #[must_use]
    pub fn ok(result: Value) -> Self {
        Self {
            status: ActionStatus::Ok,
            result,
            error: None,
        }
    }

    #[must_use]
    pub fn finished(final_answer: Value) -> Self {
        Self {
            status: ActionStatus::Finished,
            result: serde_json::json!({ "final_answer": final_answer }),
            error: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Error,
            result: Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A named, schema-described invocable tool.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// Structured description of arguments (name, type, required), rendered
    /// into the prompt verbatim so the model sees the exact contract.
    fn parameter_schema(&self) -> Value;
    async fn execute(&self, args: Value) -> TaskerResult<ActionOutcome>;
}

/// The registered set of [`Action`]s, keyed by stable name. Built once at
/// worker startup and shared read-only across concurrent task executions.
#[derive(Clone, Default)]
pub struct ActionCatalog {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl std::fmt::Debug for ActionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionCatalog")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ActionCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Names, descriptions, and schemas of every registered action, in the
    /// form the ReAct prompt renders into the "action catalog" block
    /// (`spec.md` §4.6 step 2).
    #[must_use]
    pub fn describe(&self) -> Vec<(String, String, Value)> {
        let mut names: Vec<&String> = self.actions.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let action = &self.actions[name];
                (
                    action.name().to_string(),
                    action.description().to_string(),
                    action.parameter_schema(),
                )
            })
            .collect()
    }
}
