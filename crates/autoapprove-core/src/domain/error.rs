//! Error taxonomy for the decision engine and its collaborators.

use std::time::Duration;

/// Malformed input handed to the engine. These are caller bugs, not policy outcomes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("owner must not be empty")]
    EmptyOwner,

    #[error("repository must not be empty")]
    EmptyRepo,

    #[error("change number must be positive, got {0}")]
    InvalidNumber(u64),

    #[error("cannot parse change reference '{input}': {reason}")]
    UnparseableReference { input: String, reason: String },
}

/// Errors that abort an evaluation instead of producing a [`Decision`](super::Decision).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("evaluation cancelled")]
    Cancelled,
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by a [`HostingApi`](crate::collaborator::HostingApi) implementation
/// after its own retry budget is spent.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostingError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("credential error: {0}")]
    Credential(String),

    /// Auto-merge refused because the change can already be merged as is.
    #[error("change is already mergeable")]
    ReadyToMerge,
}

impl HostingError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            HostingError::RateLimited { .. } | HostingError::Transient(_) => true,
            HostingError::Api { status, .. } => matches!(status, 408 | 429 | 500..=599),
            _ => false,
        }
    }
}

/// Result type for hosting collaborator calls.
pub type HostingResult<T> = std::result::Result<T, HostingError>;

/// Errors surfaced by a [`LanguageModel`](crate::collaborator::LanguageModel).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("model misconfigured: {0}")]
    Config(String),
}

impl ModelError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Transient(_) | ModelError::Timeout(_) => true,
            ModelError::Api { status, .. } => matches!(status, 408 | 429 | 500..=599),
            _ => false,
        }
    }
}

/// Result type for language model calls.
pub type ModelResult<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hosting_retryable_classification() {
        assert!(HostingError::Transient("reset".into()).is_retryable());
        assert!(HostingError::RateLimited { retry_after: None }.is_retryable());
        assert!(HostingError::Api {
            status: 502,
            message: "bad gateway".into()
        }
        .is_retryable());
        assert!(!HostingError::Api {
            status: 422,
            message: "unprocessable".into()
        }
        .is_retryable());
        assert!(!HostingError::NotFound("pulls/1".into()).is_retryable());
        assert!(!HostingError::ReadyToMerge.is_retryable());
    }

    #[test]
    fn test_model_timeout_is_retryable() {
        assert!(ModelError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(!ModelError::EmptyResponse.is_retryable());
    }

    #[test]
    fn test_engine_error_from_validation() {
        let err: EngineError = ValidationError::EmptyOwner.into();
        assert!(matches!(err, EngineError::Validation(ValidationError::EmptyOwner)));
        assert_eq!(err.to_string(), "invalid input: owner must not be empty");
    }
}
