/// Failure kinds surfaced to the control plane.
///
/// Handlers never leak transport errors: every variant renders as
/// `KIND: detail` inside a `success=false` response body.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Malformed request, missing field, path escape, unknown interpreter.
    #[error("INVALID_ARGUMENT: {0}")]
    InvalidArgument(String),

    /// Interpreter not allowed, inline or user-parameter execution disabled.
    #[error("PERMISSION_DENIED: {0}")]
    PermissionDenied(String),

    /// Unknown job id, script name, or user parameter.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// Concurrent-jobs cap reached.
    #[error("RESOURCE_EXHAUSTED: {0}")]
    ResourceExhausted(String),

    /// Script or HTTP deadline hit.
    #[error("DEADLINE_EXCEEDED: {0}")]
    DeadlineExceeded(String),

    /// Transient transport failure talking to the collector.
    #[error("UNAVAILABLE: {0}")]
    Unavailable(String),

    /// Unexpected handler failure.
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn invalid(detail: impl Into<String>) -> Self {
        AgentError::InvalidArgument(detail.into())
    }

    pub fn denied(detail: impl Into<String>) -> Self {
        AgentError::PermissionDenied(detail.into())
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        AgentError::NotFound(detail.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        AgentError::Internal(detail.into())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::InvalidArgument(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_kind_prefix() {
        let err = AgentError::invalid("Invalid target path");
        assert_eq!(err.to_string(), "INVALID_ARGUMENT: Invalid target path");
        let err = AgentError::ResourceExhausted("4 jobs already running".into());
        assert!(err.to_string().starts_with("RESOURCE_EXHAUSTED:"));
    }
}
