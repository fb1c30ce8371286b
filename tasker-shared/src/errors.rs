//! # Engine Error Types
//!
//! Unified error handling for the task-graph engine, following the five error
//! kinds the engine distinguishes: transport, validation, external, policy,
//! and cancellation (see `spec.md` §7).

use thiserror::Error;

/// Engine-wide result type.
pub type TaskerResult<T> = Result<T, TaskerError>;

/// The classification a [`TaskerError`] falls into, used by the bus's
/// NACK/backoff policy and by handlers deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bus or store I/O failure; retry at the bus layer.
    Transport,
    /// Malformed payload, unknown task_type, cyclic plan.
    Validation,
    /// LLM or tool failure.
    External,
    /// max_turns / max_planning_loops exceeded.
    Policy,
    /// Cooperative cancellation.
    Cancellation,
}

/// Comprehensive error type for the task-graph engine.
#[derive(Debug, Error)]
pub enum TaskerError {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("event store error: {0}")]
    StoreError(String),

    #[error("validation failed: {0}")]
    ValidationError(String),

    #[error("cyclic dependency detected among tasks: {0:?}")]
    CyclicDependency(Vec<uuid::Uuid>),

    #[error("unknown task_type: {0}")]
    UnknownTaskType(String),

    #[error("external collaborator error ({collaborator}): {message}")]
    ExternalError { collaborator: String, message: String },

    #[error("policy violation: {0}")]
    PolicyError(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("task not found: {0}")]
    TaskNotFound(uuid::Uuid),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TaskerError {
    pub fn external(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalError {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Classify this error into one of the engine's five error kinds.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransportUnavailable(_) | Self::StoreError(_) => ErrorKind::Transport,
            Self::ValidationError(_) | Self::CyclicDependency(_) | Self::UnknownTaskType(_) => {
                ErrorKind::Validation
            }
            Self::ExternalError { .. } => ErrorKind::External,
            Self::PolicyError(_) => ErrorKind::Policy,
            Self::Cancelled(_) => ErrorKind::Cancellation,
            Self::TaskNotFound(_)
            | Self::SerializationError(_)
            | Self::ConfigError(_)
            | Self::Internal(_) => ErrorKind::Validation,
        }
    }

    /// Whether the bus should retry the operation that produced this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_retryable() {
        let err = TaskerError::TransportUnavailable("broker down".to_string());
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_validation_errors_are_not_retryable() {
        let err = TaskerError::UnknownTaskType("BOGUS".to_string());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_cancellation_kind() {
        let err = TaskerError::Cancelled("run cancelled".to_string());
        assert_eq!(err.kind(), ErrorKind::Cancellation);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_external_constructor() {
        let err = TaskerError::external("llm", "timeout");
        match err {
            TaskerError::ExternalError { collaborator, message } => {
                assert_eq!(collaborator, "llm");
                assert_eq!(message, "timeout");
            }
            _ => panic!("expected ExternalError"),
        }
    }

    #[test]
    fn test_display_cyclic_dependency() {
        let id = uuid::Uuid::nil();
        let err = TaskerError::CyclicDependency(vec![id]);
        assert!(format!("{err}").contains("cyclic"));
    }
}
