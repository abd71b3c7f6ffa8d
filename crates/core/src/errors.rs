use thiserror::Error;

/// Closed-set and shape violations. These are never coerced silently: a
/// classifier label outside the enum or a key list with more than one
/// element must fail the call that produced it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("unknown scenario label `{0}`")]
    UnknownScenarioLabel(String),
    #[error("{field} must contain at most one element, got {len}")]
    TooManyKeys { field: &'static str, len: usize },
    #[error("turn index {0} is outside the allowed range 1..=5")]
    TurnIndexOutOfRange(u8),
    #[error("malformed image data URI: {0}")]
    MalformedDataUri(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failures raised while running a scenario agent. Only `ResolutionFailure`
/// is eligible for local recovery (retry with adjusted parameters); the rest
/// propagate to the orchestrator's catch-all boundary.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("resolution failed: {0}")]
    ResolutionFailure(String),
    #[error("usage budget exceeded: {0}")]
    BudgetExceeded(String),
    #[error("collaborator `{collaborator}` failed: {message}")]
    Collaborator { collaborator: &'static str, message: String },
}

impl AgentError {
    pub fn collaborator(name: &'static str, message: impl Into<String>) -> Self {
        Self::Collaborator { collaborator: name, message: message.into() }
    }

    /// Whether a scenario agent may retry locally instead of propagating.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ResolutionFailure(_))
    }
}

/// Rejections raised at the HTTP boundary before any agent work starts.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, chat_id: String },
}

#[cfg(test)]
mod tests {
    use super::{AgentError, DomainError};

    #[test]
    fn only_resolution_failures_are_recoverable() {
        assert!(AgentError::ResolutionFailure("no candidate".into()).is_recoverable());
        assert!(!AgentError::BudgetExceeded("tool calls".into()).is_recoverable());
        assert!(!AgentError::collaborator("similarity", "timeout").is_recoverable());
        assert!(!AgentError::Validation(DomainError::TooManyKeys {
            field: "base_random_keys",
            len: 2
        })
        .is_recoverable());
    }

    #[test]
    fn validation_errors_carry_the_offending_value() {
        let error = DomainError::UnknownScenarioLabel("SHOPPING".into());
        assert_eq!(error.to_string(), "unknown scenario label `SHOPPING`");
    }
}
