use thiserror::Error;

pub type Result<T> = std::result::Result<T, TriggerFlowError>;

#[derive(Debug, Error)]
pub enum TriggerFlowError {
    #[error("cannot use `{method}`: {reason}")]
    InvalidConstruct { method: &'static str, reason: String },
    #[error("chunk `{0}` not registered")]
    UnknownChunk(String),
    #[error("contract violation in `{trigger}`: {reason}")]
    ContractViolation { trigger: String, reason: String },
    #[error("handler `{handler}` failed on `{trigger}`: {message}")]
    HandlerFailed {
        trigger: String,
        handler: String,
        message: String,
    },
    #[error("execution `{0}` has already started")]
    AlreadyStarted(String),
    #[error("runtime stream of execution `{0}` is already taken")]
    StreamAlreadyTaken(String),
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TriggerFlowError {
    pub(crate) fn invalid_construct(method: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConstruct {
            method,
            reason: reason.into(),
        }
    }

    pub(crate) fn contract_violation(trigger: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContractViolation {
            trigger: trigger.into(),
            reason: reason.into(),
        }
    }
}
