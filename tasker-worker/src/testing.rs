//! Test doubles for the LLM collaborator and a minimal action catalog,
//! mirroring the teacher's `MockProvider` convention of scripted,
//! deterministic responses for scenario tests (`spec.md` §8 S1-S6).

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use tasker_shared::errors::{TaskerError, TaskerResult};

use crate::action::{Action, ActionOutcome};
use crate::llm::{ChatMessage, ChatResponse, LlmClient, Usage};

/// Replays a fixed script of completions, one per call, regardless of the
/// prompt contents. Panics-by-error if exhausted, so a test that calls it
/// more times than scripted fails loudly instead of looping.
#[derive(Debug)]
pub struct MockLlmClient {
    script: Mutex<Vec<String>>,
}

impl MockLlmClient {
    #[must_use]
    pub fn new(script: Vec<String>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().rev().collect()),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat_completion(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _temperature: Option<f32>,
    ) -> TaskerResult<ChatResponse> {
        let content = self
            .script
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| TaskerError::external("mock_llm", "script exhausted"))?;
        Ok(ChatResponse {
            usage: Usage {
                prompt_tokens: 0,
                completion_tokens: content.len() as u32,
            },
            content,
        })
    }
}

/// `echo(message)` — returns `message` unchanged as `result.echoed`.
#[derive(Debug)]
pub struct EchoAction;

#[async_trait]
impl Action for EchoAction {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes the given message back"
    }
    fn parameter_schema(&self) -> Value {
        serde_json::json!({
            "message": {"type": "string", "required": true}
        })
    }
    async fn execute(&self, args: Value) -> TaskerResult<ActionOutcome> {
        let message = args.get("message").cloned().unwrap_or(Value::Null);
        Ok(ActionOutcome::ok(serde_json::json!({ "echoed": message })))
    }
}

/// `finish(final_answer)` — the distinguished terminal action every
/// execution catalog must provide.
#[derive(Debug)]
pub struct FinishAction;

#[async_trait]
impl Action for FinishAction {
    fn name(&self) -> &str {
        "finish"
    }
    fn description(&self) -> &str {
        "Terminates the loop with a final answer"
    }
    fn parameter_schema(&self) -> Value {
        serde_json::json!({
            "final_answer": {"type": "string", "required": true}
        })
    }
    async fn execute(&self, args: Value) -> TaskerResult<ActionOutcome> {
        let final_answer = args.get("final_answer").cloned().unwrap_or(Value::Null);
        Ok(ActionOutcome::finished(final_answer))
    }
}
