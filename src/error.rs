// Error types shared by the scheduler and the musical layer

/// Timing error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimingError {
    /// An argument or configuration value is not acceptable
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation is impossible in the current lifecycle state
    #[error("State error: {0}")]
    State(String),
}

impl TimingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        TimingError::Validation(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        TimingError::State(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, TimingError::Validation(_))
    }

    pub fn is_state(&self) -> bool {
        matches!(self, TimingError::State(_))
    }
}

pub type TimingResult<T> = Result<T, TimingError>;
