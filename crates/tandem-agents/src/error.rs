use thiserror::Error;

/// Closed classification of failures, for callers that branch on cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network failure, process failure, or timeout on an external call.
    TransportFailure,
    /// The call returned but the payload is missing required fields or unparseable.
    MalformedResponse,
    /// Every backend in a fallback chain failed, including the terminal one.
    ExhaustedFallback,
    /// Some batch items were replaced with defaults. Never raised as an error.
    PartialBatchFailure,
    /// Learned configuration missing or unreadable. Recovered with defaults.
    ConfigUnavailable,
    /// Local failure that is neither transport nor payload related.
    Internal,
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Transport failure on {backend}: {message}")]
    Transport { backend: String, message: String },

    #[error("{backend} timed out after {seconds} seconds")]
    Timeout { backend: String, seconds: u64 },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Backend not implemented: {0}")]
    NotImplemented(String),

    #[error("Fallback chain exhausted after trying: {}", .attempted.join(", "))]
    ExhaustedFallback { attempted: Vec<String> },

    #[error("Configuration unavailable: {0}")]
    ConfigUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Cache error: {0}")]
    Cache(#[from] tandem_cache::CacheError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } | Self::NotImplemented(_) => {
                ErrorKind::TransportFailure
            }
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Self::ExhaustedFallback { .. } => ErrorKind::ExhaustedFallback,
            Self::ConfigUnavailable(_) => ErrorKind::ConfigUnavailable,
            Self::InvalidInput(_) | Self::Internal(_) | Self::Cache(_) | Self::Json(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn transport(backend: &str, message: impl Into<String>) -> Self {
        Self::Transport {
            backend: backend.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_classify_as_transport() {
        let err = AgentError::Timeout {
            backend: "haiku".to_string(),
            seconds: 45,
        };
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert_eq!(err.to_string(), "haiku timed out after 45 seconds");
    }

    #[test]
    fn exhausted_lists_backends() {
        let err = AgentError::ExhaustedFallback {
            attempted: vec!["grok".to_string(), "haiku".to_string()],
        };
        assert_eq!(err.kind(), ErrorKind::ExhaustedFallback);
        assert!(err.to_string().ends_with("grok, haiku"));
    }

    #[test]
    fn malformed_is_its_own_kind() {
        let err = AgentError::MalformedResponse("missing field: confidence".to_string());
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }
}
