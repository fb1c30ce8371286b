//! Planning Worker (C5) and Execution Worker (C6): the LLM-driven leaves of
//! the task-graph engine. The Planning Worker decomposes a goal into
//! subtasks (`spec.md` §4.5); the Execution Worker runs a bounded ReAct loop
//! over a registered action catalog (`spec.md` §4.6).

pub mod action;
pub mod execution;
pub mod llm;
pub mod planning;
mod react;
pub mod testing;

pub use action::{Action, ActionCatalog, ActionOutcome, ActionStatus};
pub use execution::ExecutionWorker;
pub use llm::{ChatMessage, ChatResponse, ChatRole, LlmClient, Usage};
pub use planning::PlanningWorker;
