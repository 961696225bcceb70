use thiserror::Error;

/// Errors raised by the intake core
#[derive(Error, Debug)]
pub enum IntakeError {
    /// Empty or unusable transcript; the caller re-prompts without a stage change
    #[error("Empty transcript")]
    EmptyInput,

    /// Network failure, timeout or non-2xx status from the language model
    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// The language model answered, but not with the required JSON shape
    #[error("Schema violation: {reason}")]
    SchemaViolation { reason: String, raw: String },

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Render failure: {0}")]
    Render(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Work was abandoned because the session was stopped
    #[error("Cancelled")]
    Cancelled,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IntakeError {
    pub fn schema(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::SchemaViolation {
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    /// Whether the failure is recovered locally rather than surfaced to the user
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::EmptyInput | Self::UpstreamUnreachable(_))
    }
}

pub type IntakeResult<T> = Result<T, IntakeError>;
