//! Error types for Trellis.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Workflow errors
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    // Matrix errors
    #[error("Invalid matrix: {0}")]
    InvalidMatrix(String),

    #[error("Axis '{axis}' declares value {value} more than once")]
    DuplicateAxisValue { axis: String, value: String },

    #[error("{entry} references value {value} which is not declared in axis '{axis}'")]
    UnknownAxisValue {
        entry: String,
        axis: String,
        value: String,
    },

    // Step errors
    #[error("Step failed with exit code {exit_code}: {message}")]
    StepFailed { exit_code: i32, message: String },

    #[error("Step timeout after {minutes} minutes")]
    StepTimeout { minutes: u32 },

    #[error("Action failed: {0}")]
    ActionFailed(String),

    // Cache errors
    #[error("Cache write failed: {0}")]
    CacheWriteFailed(String),

    #[error("Cache entry corrupt: {0}")]
    CacheCorrupt(String),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
