// src/error.rs
//! Error taxonomy for the content generation engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid workflow model: {0}")]
    InvalidModel(String),

    #[error("no workflow models registered")]
    NoModelsRegistered,

    #[error("missing required inputs: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("generation backend error ({status}): {body}")]
    GenerationBackend { status: u16, body: String },

    #[error("generation timed out after {timeout_ms}ms")]
    GenerationTimeout { timeout_ms: u64 },

    #[error("job submission failed: {0}")]
    JobSubmission(String),

    #[error("polling failed: {0}")]
    PollingTransient(String),

    #[error("workflow cancelled")]
    Cancelled,

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Only backend failures and timeouts are eligible for the phase
    /// executor's retry budget. Validation and submission errors surface
    /// immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::GenerationBackend { .. } | EngineError::GenerationTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::GenerationBackend {
            status: 503,
            body: "unavailable".to_string()
        }
        .is_retryable());
        assert!(EngineError::GenerationTimeout { timeout_ms: 60_000 }.is_retryable());
        assert!(!EngineError::Validation(vec!["topic".to_string()]).is_retryable());
        assert!(!EngineError::JobSubmission("rejected".to_string()).is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
    }

    #[test]
    fn test_validation_message_lists_missing_keys() {
        let err = EngineError::Validation(vec!["topic".to_string(), "keywords".to_string()]);
        assert_eq!(err.to_string(), "missing required inputs: topic, keywords");
    }
}
