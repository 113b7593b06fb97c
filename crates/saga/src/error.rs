use thiserror::Error;

/// Error type returned by saga step and compensation closures.
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during saga execution.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A saga step failed. Compensation for previously completed steps has
    /// already run; `source` is the step's original error.
    #[error("Saga step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: StepError,
    },
}

impl SagaError {
    /// Name of the step that failed.
    pub fn step(&self) -> &str {
        match self {
            Self::StepFailed { step, .. } => step,
        }
    }
}

/// Result type for saga operations.
pub type Result<T> = std::result::Result<T, SagaError>;
