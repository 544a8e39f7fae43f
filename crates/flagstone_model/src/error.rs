//! Error types for flag model construction and definition files.

use thiserror::Error;

/// Errors that can occur while building or loading flag definitions.
#[derive(Debug, Error)]
pub enum Error {
    /// The flag definition violates a model invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// A condition names an operator outside the supported set.
    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    /// The definition file is structurally valid but semantically wrong.
    #[error("invalid flag file: {reason}")]
    InvalidFile {
        /// Reason the file was rejected.
        reason: String,
    },

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Result type alias for model operations.
pub type Result<T> = std::result::Result<T, Error>;
