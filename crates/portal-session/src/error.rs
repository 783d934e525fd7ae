use portal_core::errors::{TransportError, ValidationError};

/// Failures surfaced to the user. Cancellation is not an error; see
/// [`TurnOutcome::Cancelled`](crate::orchestrator::TurnOutcome::Cancelled).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// True when nothing was sent to the gateway.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::EmptyInput) => "empty_input",
            Self::Validation(ValidationError::Unauthenticated) => "unauthenticated",
            Self::Validation(ValidationError::NoActiveConversation) => "no_active_conversation",
            Self::Transport(e) => e.error_kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_transparent() {
        let err = SessionError::from(ValidationError::EmptyInput);
        assert_eq!(err.to_string(), "message is empty");
        assert!(err.is_validation());

        let err = SessionError::from(TransportError::NetworkError("refused".into()));
        assert_eq!(err.to_string(), "network error: refused");
        assert_eq!(err.error_kind(), "network_error");
    }
}
