//! Error types for tollgate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Load-time errors, fatal to the whole invocation
    #[error("Invalid pipeline definition: {0}")]
    InvalidSpec(String),

    // Job-scoped errors
    #[error("Environment error: {0}")]
    Environment(String),

    #[error(
        "Step '{step}' failed with {}",
        .exit_code.map_or_else(|| "no exit code".to_string(), |code| format!("exit code {}", code))
    )]
    StepFailed { step: String, exit_code: Option<i32> },

    #[error("Step '{step}' could not be started: {message}")]
    StepError { step: String, message: String },

    // Action resolution
    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Action unavailable: {0}")]
    ActionUnavailable(String),

    #[error("Run cancelled")]
    Cancelled,

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error means a step could not even be invoked.
    pub fn is_unresolvable(&self) -> bool {
        matches!(
            self,
            Error::ActionNotFound(_) | Error::ActionUnavailable(_) | Error::StepError { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::InvalidSpec(err.to_string())
    }
}
