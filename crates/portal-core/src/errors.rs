use std::time::Duration;

/// Failures talking to the inference gateway. Any of these aborts the turn.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::NetworkError(_)
                | Self::StreamInterrupted(_)
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
        }
    }

    /// Classify a non-2xx HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 | 422 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

/// Rejections raised before any I/O is attempted.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("message is empty")]
    EmptyInput,
    #[error("sign in to send messages")]
    Unauthenticated,
    #[error("no active conversation")]
    NoActiveConversation,
}

/// Background write failures. Logged, never surfaced to the user.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_mapping() {
        assert!(matches!(
            TransportError::from_status(401, "nope".into()),
            TransportError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            TransportError::from_status(400, "bad".into()),
            TransportError::InvalidRequest(_)
        ));
        assert!(TransportError::from_status(429, String::new()).is_retryable());
        assert!(TransportError::from_status(502, "bad gateway".into()).is_retryable());
        assert!(!TransportError::from_status(403, String::new()).is_retryable());
    }

    #[test]
    fn unexpected_status_keeps_code_in_message() {
        let err = TransportError::from_status(302, "moved".into());
        assert!(err.to_string().contains("302"));
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(TransportError::NetworkError("x".into()).error_kind(), "network_error");
        assert_eq!(
            TransportError::ServerError { status: 500, body: String::new() }.error_kind(),
            "server_error"
        );
    }

    #[test]
    fn validation_messages_are_user_facing() {
        assert_eq!(ValidationError::EmptyInput.to_string(), "message is empty");
        assert_eq!(ValidationError::NoActiveConversation.to_string(), "no active conversation");
    }
}
