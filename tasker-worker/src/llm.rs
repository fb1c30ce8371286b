//! The LLM collaborator contract (`spec.md` §4.6, §6): `chat_completion` is a
//! synchronous-looking call from the worker's perspective, but the trait is
//! async so the worker can run many tasks concurrently against it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tasker_shared::errors::TaskerResult;

/// One turn of a chat-style prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Token accounting returned alongside a completion, used for observability
/// only — the worker does not enforce a budget from this.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Usage,
}

/// `chat_completion(model, messages, temperature?) -> response` (`spec.md`
/// §6). Implementations must be safe for concurrent calls; rate limiting is
/// this collaborator's responsibility, not the worker's.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: Option<f32>,
    ) -> TaskerResult<ChatResponse>;
}
